use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::models::ApiConfig;
use crate::utils::path_component;

/// Give up looking for a free file name after this many suffixes.
const MAX_SUFFIX: u32 = 1000;

/// Body of one output file.
#[derive(Debug, Serialize)]
pub struct ResponseDocument<'a> {
    pub user: &'a str,
    pub target: &'a str,
    pub api: &'a str,
    pub sub_type: &'a str,
    pub metric_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub total_num_records: u64,
    pub data: &'a [Value],
}

/// Writes one JSON file per successful fetch for the external loaders.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    root: PathBuf,
    pretty: bool,
}

impl ResponseWriter {
    pub fn new(root: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            root: root.into(),
            pretty,
        }
    }

    /// `<root>/<email>/<api>/<api>_<sub>_<metric>_<target>_<unix>[_n].json`
    pub async fn write(
        &self,
        api: &ApiConfig,
        document: &ResponseDocument<'_>,
        written_at: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        let dir = self
            .root
            .join(path_component(document.user))
            .join(path_component(&api.name));
        tokio::fs::create_dir_all(&dir).await?;

        let body = if self.pretty {
            serde_json::to_vec_pretty(document)
        } else {
            serde_json::to_vec(document)
        }
        .map_err(io::Error::other)?;

        let stem = format!(
            "{}_{}_{}_{}_{}",
            path_component(&api.name),
            path_component(document.sub_type),
            path_component(document.metric_type),
            path_component(document.target),
            written_at.timestamp()
        );

        let path = create_unique(&dir, &stem, &body).await?;
        debug!(
            user = %document.user,
            api = %api.name,
            path = %path.display(),
            records = document.data.len(),
            "Response written"
        );
        Ok(path)
    }
}

async fn create_unique(dir: &Path, stem: &str, body: &[u8]) -> io::Result<PathBuf> {
    for suffix in 0..MAX_SUFFIX {
        let name = if suffix == 0 {
            format!("{stem}.json")
        } else {
            format!("{stem}_{suffix}.json")
        };
        let path = dir.join(name);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(body).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free file name for {stem} in {}", dir.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::api::sample_api;
    use crate::models::ApiKind;
    use chrono::TimeZone;
    use serde_json::json;

    #[tokio::test]
    async fn test_collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResponseWriter::new(dir.path(), false);
        let api = sample_api(ApiKind::Performance, Some("RADIO"));
        let data = vec![json!({"event_time": "2024-03-01T10:00:00Z"})];
        let document = ResponseDocument {
            user: "ops@example.com",
            target: "nhg-1",
            api: &api.name,
            sub_type: api.sub_type_label(),
            metric_type: api.metric_type_label(),
            start_time: None,
            end_time: None,
            total_num_records: 1,
            data: &data,
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        let first = writer.write(&api, &document, now).await.unwrap();
        let second = writer.write(&api, &document, now).await.unwrap();
        let third = writer.write(&api, &document, now).await.unwrap();

        let base = dir.path().join("ops@example.com").join("pmdata");
        let stem = format!("pmdata_HISTORY_RADIO_nhg-1_{}", now.timestamp());
        assert_eq!(first, base.join(format!("{stem}.json")));
        assert_eq!(second, base.join(format!("{stem}_1.json")));
        assert_eq!(third, base.join(format!("{stem}_2.json")));

        let written: Value = serde_json::from_slice(&std::fs::read(first).unwrap()).unwrap();
        assert_eq!(written["target"], "nhg-1");
        assert_eq!(written["data"].as_array().unwrap().len(), 1);
        assert!(written.get("start_time").is_none());
    }

    #[tokio::test]
    async fn test_pretty_print_flag() {
        let dir = tempfile::tempdir().unwrap();
        let api = sample_api(ApiKind::Sim, None);
        let document = ResponseDocument {
            user: "ops@example.com",
            target: "nhg-1",
            api: &api.name,
            sub_type: api.sub_type_label(),
            metric_type: api.metric_type_label(),
            start_time: None,
            end_time: None,
            total_num_records: 0,
            data: &[],
        };

        let compact = ResponseWriter::new(dir.path().join("compact"), false)
            .write(&api, &document, Utc::now())
            .await
            .unwrap();
        let pretty = ResponseWriter::new(dir.path().join("pretty"), true)
            .write(&api, &document, Utc::now())
            .await
            .unwrap();

        assert!(!std::fs::read_to_string(compact).unwrap().contains('\n'));
        assert!(std::fs::read_to_string(pretty).unwrap().contains('\n'));
    }
}
