//! Loading work items from disk.
//!
//! Three layouts are accepted:
//! - CSV with a header row, chosen by the `.csv` extension
//! - a JSON array of objects
//! - JSON Lines, one object per line (blank lines are skipped)
//!
//! Every point must carry an `id` field (string or integer). The whole
//! object or row becomes the item payload. In CSV rows `value` is read as
//! an integer and `timestamp` as a float; every other column stays a string.

use std::path::Path;

use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use crate::error::LoadError;
use crate::scheduler::WorkItem;

/// Progress is logged every time this many points have been read.
const LOG_EVERY: usize = 1000;

/// Reads points from `path`, keeping at most `limit` of them.
pub async fn load_points(
    path: impl AsRef<Path>,
    limit: Option<usize>,
) -> Result<Vec<WorkItem>, LoadError> {
    let path = path.as_ref();
    info!(path = %path.display(), "Loading points");

    let content = tokio::fs::read_to_string(path).await?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let points = if is_csv {
        parse_csv_points(&content, limit)?
    } else {
        parse_points(&content, limit)?
    };

    info!(path = %path.display(), count = points.len(), "Loaded points");
    Ok(points)
}

/// Parses points from an in-memory JSON array or JSON Lines document.
pub fn parse_points(content: &str, limit: Option<usize>) -> Result<Vec<WorkItem>, LoadError> {
    let limit = limit.unwrap_or(usize::MAX);

    if content.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(content)?;
        return values
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, value)| to_item(value, index + 1, index + 1))
            .collect();
    }

    let mut points = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if points.len() >= limit {
            break;
        }
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|source| {
            LoadError::InvalidJson {
                line: line_no,
                source,
            }
        })?;
        points.push(to_item(value, line_no, points.len() + 1)?);
    }

    Ok(points)
}

/// Parses points from CSV text whose first row names the columns.
pub fn parse_csv_points(content: &str, limit: Option<usize>) -> Result<Vec<WorkItem>, LoadError> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    let mut points = Vec::new();
    for record in reader.records() {
        if points.len() >= limit {
            break;
        }
        let record = record?;
        let line = record.position().map_or(0, |pos| pos.line() as usize);

        let mut object = Map::new();
        for (field, raw) in headers.iter().zip(record.iter()) {
            object.insert(field.to_string(), csv_value(field, raw, line)?);
        }
        points.push(to_item(Value::Object(object), line, points.len() + 1)?);
    }

    Ok(points)
}

fn csv_value(field: &str, raw: &str, line: usize) -> Result<Value, LoadError> {
    let invalid = || LoadError::InvalidField {
        line,
        field: field.to_string(),
        value: raw.to_string(),
    };

    match field {
        "value" => raw.trim().parse::<i64>().map(Value::from).map_err(|_| invalid()),
        "timestamp" => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn to_item(value: Value, line: usize, count: usize) -> Result<WorkItem, LoadError> {
    let Value::Object(object) = value else {
        return Err(LoadError::NotAnObject { line });
    };
    let id = point_id(&object).ok_or(LoadError::MissingId { line })?;

    if count % LOG_EVERY == 0 {
        debug!(count = count, "Loaded points so far");
    }

    Ok(WorkItem::new(id, Value::Object(object)))
}

fn point_id(object: &Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    }
}
