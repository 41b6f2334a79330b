//! `cascade search` — the exact query engine (spec §6, §4.9).

use std::sync::Arc;

use clap::Args;
use serde_json::json;

use cascade_query::{AggOp, Aggregation, Condition, DetailLevel, Op, QueryEngine, QueryRequest};

use crate::output::{create_table, format_duration, print_error, print_warning, OutputFormat};

#[derive(Args)]
pub struct SearchArgs {
    /// Model's technical name to query.
    pub model: String,

    /// Repeatable `field:op:value` triples, ANDed together. `op` is one of
    /// eq, neq, gt, gte, lt, lte, in, contains. `in` values are comma-separated.
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<Condition>,

    /// Repeatable `field:op:alias` triples. `op` is one of sum, count, avg, min, max.
    #[arg(long = "agg", value_parser = parse_aggregation)]
    pub aggregations: Vec<Aggregation>,

    #[arg(long, value_delimiter = ',')]
    pub group_by: Vec<String>,

    /// Record-mode projection; ignored when aggregations are supplied.
    #[arg(long, value_delimiter = ',')]
    pub fields: Vec<String>,

    #[arg(long, default_value_t = 100)]
    pub limit: u64,

    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// FK field to resolve to `name`/`display_name` on each record.
    #[arg(long)]
    pub link: Option<String>,

    /// JSON field (record-id keyed weights) to resolve the same way.
    #[arg(long)]
    pub link_json: Option<String>,

    /// Target model for `--link-json` (the JSON keys are that model's record ids).
    #[arg(long)]
    pub link_json_target_model: Option<String>,

    #[arg(long)]
    pub include_graph_context: bool,

    #[arg(long)]
    pub include_validation_status: bool,

    #[arg(long)]
    pub include_similar: bool,

    #[arg(long, default_value_t = 5)]
    pub similar_limit: u64,

    #[arg(long, value_enum)]
    pub detail_level: Option<DetailLevelArg>,

    #[arg(long, default_value_t = 20)]
    pub top_n: usize,

    #[arg(long)]
    pub export_to_file: bool,

    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DetailLevelArg {
    Summary,
    TopN,
    Full,
}

impl From<DetailLevelArg> for DetailLevel {
    fn from(value: DetailLevelArg) -> Self {
        match value {
            DetailLevelArg::Summary => DetailLevel::Summary,
            DetailLevelArg::TopN => DetailLevel::TopN,
            DetailLevelArg::Full => DetailLevel::Full,
        }
    }
}

fn parse_filter(raw: &str) -> Result<Condition, String> {
    let mut parts = raw.splitn(3, ':');
    let field = parts.next().ok_or("missing field")?;
    let op_raw = parts.next().ok_or("missing operator")?;
    let value_raw = parts.next().ok_or("missing value")?;
    let op = match op_raw {
        "eq" => Op::Eq,
        "neq" => Op::Neq,
        "gt" => Op::Gt,
        "gte" => Op::Gte,
        "lt" => Op::Lt,
        "lte" => Op::Lte,
        "in" => Op::In,
        "contains" => Op::Contains,
        other => return Err(format!("unknown filter operator {other:?}")),
    };
    let value = if op == Op::In {
        json!(value_raw.split(',').collect::<Vec<_>>())
    } else {
        parse_scalar(value_raw)
    };
    Ok(Condition::new(field, op, value))
}

fn parse_scalar(raw: &str) -> serde_json::Value {
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(n) = raw.parse::<f64>() {
        return json!(n);
    }
    if let Ok(b) = raw.parse::<bool>() {
        return json!(b);
    }
    json!(raw)
}

fn parse_aggregation(raw: &str) -> Result<Aggregation, String> {
    let mut parts = raw.splitn(3, ':');
    let field = parts.next().ok_or("missing field")?.to_string();
    let op_raw = parts.next().ok_or("missing aggregation op")?;
    let alias = parts.next().unwrap_or(op_raw).to_string();
    let op = match op_raw {
        "sum" => AggOp::Sum,
        "count" => AggOp::Count,
        "avg" => AggOp::Avg,
        "min" => AggOp::Min,
        "max" => AggOp::Max,
        other => return Err(format!("unknown aggregation operator {other:?}")),
    };
    Ok(Aggregation { field, op, alias })
}

pub async fn run(args: SearchArgs, engine: Arc<QueryEngine>) -> i32 {
    let mut request = QueryRequest::new(args.model);
    request.filters = args.filters;
    request.aggregations = args.aggregations;
    request.group_by = args.group_by;
    request.fields = args.fields;
    request.limit = args.limit;
    request.offset = args.offset;
    request.link = args.link;
    request.link_json = args.link_json;
    request.link_json_target_model = args.link_json_target_model;
    request.include_graph_context = args.include_graph_context;
    request.include_validation_status = args.include_validation_status;
    request.include_similar = args.include_similar;
    request.similar_limit = args.similar_limit;
    if let Some(level) = args.detail_level {
        request.detail_level = level.into();
    }
    request.top_n = args.top_n;
    request.export_to_file = args.export_to_file;

    match engine.run(&request).await {
        Ok(response) => {
            if response.truncated {
                print_warning("response was truncated by the row-scan safety limit");
            }
            match args.format {
                OutputFormat::Json => println!("{}", render_json(&response)),
                OutputFormat::Table => render_table(&response),
            }
            0
        }
        Err(e) => {
            print_error(&e.to_string());
            match e {
                cascade_core::Error::Validation(_) | cascade_core::Error::UnindexedFilter { .. } => 1,
                cascade_core::Error::CircuitOpen { .. } | cascade_core::Error::UpstreamUnavailable(_) => 2,
                cascade_core::Error::SchemaMissing { .. } | cascade_core::Error::SchemaEmpty => 1,
                _ => 64,
            }
        }
    }
}

fn render_json(response: &cascade_query::QueryResponse) -> serde_json::Value {
    let aggregation = response.aggregation.as_ref().map(|agg| {
        json!({
            "groups": agg.groups.iter().map(|g| json!({"group_key": g.group_key, "values": g.values})).collect::<Vec<_>>(),
            "remaining_groups": agg.remaining_groups,
            "checksum": {
                "grand_total": agg.checksum.grand_total,
                "record_count": agg.checksum.record_count,
                "aggregation_field": agg.checksum.aggregation_field,
                "aggregation_op": agg.checksum.aggregation_op,
                "hash": agg.checksum.hash,
                "computed_at": agg.checksum.computed_at.to_rfc3339(),
            },
        })
    });
    json!({
        "aggregation": aggregation,
        "records": response.records,
        "truncated": response.truncated,
        "estimated_tokens": response.estimated_tokens,
        "duration_micros": response.elapsed.as_micros() as u64,
        "export": response.export.as_ref().map(|e| json!({"filename": e.filename, "path": e.location})),
    })
}

fn render_table(response: &cascade_query::QueryResponse) {
    if let Some(export) = &response.export {
        println!("exported to {} ({})", export.location, export.filename);
        return;
    }
    if let Some(agg) = &response.aggregation {
        let mut table = create_table(vec!["group", "values"]);
        for group in &agg.groups {
            let key = if group.group_key.is_empty() { "(all)".to_string() } else { group.group_key.clone() };
            table.add_row(vec![key, format!("{:?}", group.values)]);
        }
        println!("{table}");
        if let Some(remaining) = agg.remaining_groups {
            println!("... {remaining} more groups not shown");
        }
        println!(
            "grand_total={} record_count={} checksum={}",
            agg.checksum.grand_total, agg.checksum.record_count, agg.checksum.hash
        );
    } else if let Some(records) = &response.records {
        for record in records {
            println!("{record}");
        }
        println!("{} record(s)", records.len());
    }
    println!("estimated_tokens={} ({})", response.estimated_tokens, format_duration(response.elapsed.as_micros()));
}
