use anyhow::{Context, Result};
use serde_json::json;

use super::{parse_rows, print_json};
use crate::cli::{DeleteRowArgs, WriteArgs};
use crate::range::RangeSpec;
use crate::service::RecordService;
use crate::store::BackingStore;

pub async fn execute_write<S: BackingStore + 'static>(
    service: &RecordService<S>,
    args: WriteArgs,
) -> Result<()> {
    let rows = parse_rows(&args.rows)?;
    let ack = service
        .write_records(&RangeSpec::parse(&args.range), &rows)
        .await
        .context("Write was not persisted")?;
    print_json(&ack)
}

pub async fn execute_append<S: BackingStore + 'static>(
    service: &RecordService<S>,
    args: WriteArgs,
) -> Result<()> {
    let rows = parse_rows(&args.rows)?;
    let ack = service
        .append_records(&RangeSpec::parse(&args.range), &rows)
        .await
        .context("Append was not persisted")?;
    print_json(&ack)
}

pub async fn execute_delete_row<S: BackingStore + 'static>(
    service: &RecordService<S>,
    args: DeleteRowArgs,
) -> Result<()> {
    let deleted = service
        .delete_record(&args.region, args.row)
        .await
        .with_context(|| format!("Failed to delete row {} from '{}'", args.row, args.region))?;

    print_json(&json!({
        "region": args.region,
        "row": args.row,
        "deleted": deleted,
    }))
}
