//! `bd list` - filtered issue listing.

use crate::cli::commands::print_issues;
use crate::cli::context::AppContext;
use crate::cli::ListArgs;
use crate::error::Result;
use crate::storage::ListFilters;

pub fn execute(args: &ListArgs, ctx: &AppContext) -> Result<()> {
    let mut filters = ListFilters {
        include_closed: args.closed,
        limit: args.limit,
        assignee: args.assignee.clone(),
        label: args.label.clone(),
        ..ListFilters::default()
    };
    if let Some(status) = &args.status {
        filters.statuses = Some(vec![status.parse()?]);
        filters.include_closed = true;
    }
    if let Some(issue_type) = &args.issue_type {
        filters.issue_type = Some(issue_type.parse()?);
    }

    let issues = ctx.storage.list_issues(&filters)?;
    print_issues(&issues, ctx.json)
}
