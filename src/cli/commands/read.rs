use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;

use super::print_json;
use crate::cli::GetArgs;
use crate::range::RangeSpec;
use crate::service::RecordService;
use crate::store::BackingStore;
use crate::TabularResult;

pub async fn execute_get<S: BackingStore + 'static>(
    service: &RecordService<S>,
    args: GetArgs,
) -> Result<()> {
    let outcome = match (&args.dataset, &args.range) {
        (Some(name), _) => service.get_dataset(name).await.with_context(|| {
            let known: Vec<&str> = service.datasets().map(|(name, _)| name).collect();
            format!("Known datasets: {}", known.join(", "))
        })?,
        (None, Some(range)) => {
            service
                .get_records(
                    range,
                    &RangeSpec::parse(range),
                    TabularResult::empty(),
                    Duration::from_millis(args.ttl_ms),
                )
                .await
        }
        (None, None) => anyhow::bail!("Pass a dataset name or --range"),
    };

    if args.records {
        let records = outcome.data.to_records();
        print_json(&json!({
            "source": outcome.source,
            "timestamp": outcome.timestamp,
            "count": records.len(),
            "records": records,
        }))
    } else {
        print_json(&outcome)
    }
}

pub async fn execute_regions<S: BackingStore + 'static>(service: &RecordService<S>) -> Result<()> {
    let regions = service
        .regions()
        .await
        .context("Failed to list regions")?;
    print_json(&regions)
}
