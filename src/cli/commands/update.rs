//! `bd update` - field-level updates from `field=value` pairs.

use crate::cli::context::AppContext;
use crate::cli::UpdateArgs;
use crate::error::{BeadsError, Result};
use crate::storage::IssueUpdate;
use serde_json::{json, Map, Value};

pub fn execute(args: &UpdateArgs, ctx: &mut AppContext) -> Result<()> {
    let fields = parse_fields(&args.fields)?;

    if let Some(result) = ctx.try_daemon(
        "update",
        json!({"id": args.id, "fields": Value::Object(fields.clone())}),
    ) {
        result?;
        println!("Updated {}", args.id);
        return Ok(());
    }

    let update = IssueUpdate::from_map(&fields)?;
    let updated = ctx
        .storage
        .update_issue(&args.id, &update, &ctx.actor.clone())?;
    ctx.mark_mutated();

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("Updated {}", updated.id);
    }
    Ok(())
}

/// Parse `field=value` pairs into the JSON map the patch layer validates.
fn parse_fields(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (field, value) = pair.split_once('=').ok_or_else(|| {
            BeadsError::validation("fields", format!("expected field=value, got '{pair}'"))
        })?;
        let json_value = match field {
            "priority" => value
                .trim_start_matches(['p', 'P'])
                .parse::<i64>()
                .map_or_else(|_| Value::String(value.to_string()), Value::from),
            _ => Value::String(value.to_string()),
        };
        map.insert(field.to_string(), json_value);
    }
    Ok(map)
}
