//! `bd search` - substring search over text fields.

use crate::cli::commands::print_issues;
use crate::cli::context::AppContext;
use crate::cli::SearchArgs;
use crate::error::Result;
use crate::storage::ListFilters;

pub fn execute(args: &SearchArgs, ctx: &AppContext) -> Result<()> {
    let filters = ListFilters {
        include_closed: args.closed,
        limit: args.limit,
        ..ListFilters::default()
    };
    let issues = ctx.storage.search_issues(&args.query, &filters)?;
    print_issues(&issues, ctx.json)
}
