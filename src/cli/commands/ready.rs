//! `bd ready` - unblocked work, sorted per policy.

use crate::cli::commands::print_issues;
use crate::cli::context::AppContext;
use crate::cli::ReadyArgs;
use crate::error::Result;
use crate::storage::{ReadyFilters, SortPolicy};

pub fn execute(args: &ReadyArgs, ctx: &AppContext) -> Result<()> {
    let sort: SortPolicy = args.sort.parse()?;
    let mut filters = ReadyFilters {
        assignee: args.assignee.clone(),
        limit: args.limit,
        ..ReadyFilters::default()
    };
    if let Some(priority) = &args.priority {
        filters.priority = Some(priority.parse()?);
    }

    let issues = ctx.storage.get_ready_work(&filters, sort)?;
    print_issues(&issues, ctx.json)
}
