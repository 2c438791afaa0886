//! Minimal BigQuery REST v2 client: submits a batch-priority query job with
//! named parameters and pages through the results.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{Querier, QueryParam};

const BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

pub struct BigQueryRest {
    http: reqwest::Client,
    project: String,
    token: String,
}

impl BigQueryRest {
    /// Create a client for the given GCP project. `token` is an OAuth2
    /// access token with bigquery scope.
    pub fn new(project: &str, token: &str) -> BigQueryRest {
        BigQueryRest {
            http: reqwest::Client::new(),
            project: project.to_string(),
            token: token.to_string(),
        }
    }

    async fn insert_job(&self, query: &str, params: &[QueryParam]) -> Result<String> {
        let query_parameters: Vec<Value> = params
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "parameterType": {"type": "STRING"},
                    "parameterValue": {"value": p.value},
                })
            })
            .collect();
        let body = json!({
            "configuration": {
                "query": {
                    "query": query,
                    "useLegacySql": false,
                    "priority": "BATCH",
                    "parameterMode": "NAMED",
                    "queryParameters": query_parameters,
                }
            }
        });
        let url = format!("{}/projects/{}/jobs", BASE_URL, self.project);
        let resp: Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("submitting query job")?
            .error_for_status()
            .context("query job rejected")?
            .json()
            .await
            .context("decoding job response")?;
        match resp["jobReference"]["jobId"].as_str() {
            Some(id) => Ok(id.to_string()),
            None => bail!("job response missing jobId: {}", resp),
        }
    }

    async fn get_results_page(&self, job_id: &str, page_token: Option<&str>) -> Result<Value> {
        let url = format!("{}/projects/{}/queries/{}", BASE_URL, self.project, job_id);
        let mut req = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            // Long-poll so batch jobs do not require a separate status loop.
            .query(&[("timeoutMs", "60000"), ("maxResults", "10000")]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }
        req.send()
            .await
            .context("fetching query results")?
            .error_for_status()
            .context("query results request failed")?
            .json()
            .await
            .context("decoding query results")
    }
}

#[async_trait]
impl Querier for BigQueryRest {
    async fn rows(&self, query: &str, params: &[QueryParam]) -> Result<Vec<Value>> {
        let job_id = self.insert_job(query, params).await?;
        tracing::debug!("query job {} submitted", job_id);

        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.get_results_page(&job_id, page_token.as_deref()).await?;
            if page["jobComplete"] == Value::Bool(false) {
                // Batch jobs may sit in the queue past the poll timeout.
                continue;
            }
            if let Some(errors) = page["errors"].as_array() {
                if !errors.is_empty() {
                    bail!("query failed: {}", Value::Array(errors.clone()));
                }
            }
            let fields = page["schema"]["fields"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            if let Some(page_rows) = page["rows"].as_array() {
                for row in page_rows {
                    rows.push(convert_row(&fields, row));
                }
            }
            match page["pageToken"].as_str() {
                Some(token) => page_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(rows)
    }
}

/// Convert one REST-encoded result row ({"f": [{"v": ...}, ...]}) into a
/// JSON object keyed by schema field name.
fn convert_row(fields: &[Value], row: &Value) -> Value {
    let cells = row["f"].as_array().cloned().unwrap_or_default();
    let mut obj = Map::new();
    for (field, cell) in fields.iter().zip(cells.iter()) {
        let name = field["name"].as_str().unwrap_or_default().to_string();
        obj.insert(name, convert_value(field, &cell["v"]));
    }
    Value::Object(obj)
}

fn convert_value(field: &Value, v: &Value) -> Value {
    if field["mode"] == "REPEATED" {
        let items = v.as_array().cloned().unwrap_or_default();
        let mut scalar_field = field.clone();
        scalar_field["mode"] = Value::String("NULLABLE".to_string());
        return Value::Array(
            items
                .iter()
                .map(|item| convert_value(&scalar_field, &item["v"]))
                .collect(),
        );
    }
    if v.is_null() {
        return Value::Null;
    }
    match field["type"].as_str().unwrap_or("STRING") {
        "RECORD" | "STRUCT" => {
            let nested = field["fields"].as_array().cloned().unwrap_or_default();
            convert_row(&nested, v)
        }
        "INTEGER" | "INT64" => v
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT" | "FLOAT64" => v
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" | "BOOL" => v
            .as_str()
            .map(|s| Value::Bool(s == "true"))
            .unwrap_or(Value::Null),
        _ => v.clone(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_flat_row() {
        let fields = vec![
            json!({"name": "ArchiveURL", "type": "STRING"}),
            json!({"name": "Total", "type": "INTEGER"}),
        ];
        let row = json!({"f": [{"v": "gs://b/a.tgz"}, {"v": "12"}]});
        let out = convert_row(&fields, &row);
        assert_eq!(out["ArchiveURL"], "gs://b/a.tgz");
        assert_eq!(out["Total"], 12);
    }

    #[test]
    fn test_convert_repeated_record() {
        // The shape returned for ARRAY<STRUCT<DstIP STRING, Filename STRING>>.
        let fields = vec![json!({
            "name": "Files",
            "type": "RECORD",
            "mode": "REPEATED",
            "fields": [
                {"name": "DstIP", "type": "STRING"},
                {"name": "Filename", "type": "STRING"},
            ],
        })];
        let row = json!({"f": [{"v": [
            {"v": {"f": [{"v": "1.2.3.4"}, {"v": "a.json"}]}},
            {"v": {"f": [{"v": "5.6.7.8"}, {"v": "b.json"}]}},
        ]}]});
        let out = convert_row(&fields, &row);
        assert_eq!(out["Files"][0]["DstIP"], "1.2.3.4");
        assert_eq!(out["Files"][1]["Filename"], "b.json");
    }

    #[test]
    fn test_convert_null_cell() {
        let fields = vec![json!({"name": "Maybe", "type": "STRING"})];
        let row = json!({"f": [{"v": null}]});
        let out = convert_row(&fields, &row);
        assert_eq!(out["Maybe"], Value::Null);
    }
}
