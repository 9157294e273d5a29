use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use rdb::RdbReader;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tracing::debug;

use crate::{CatalogError, CatalogState, SNAPSHOT_SUFFIX};

#[derive(Debug, Deserialize)]
pub(crate) struct HostQuery {
    host: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileQuery {
    host: String,
    file: String,
}

/// One key of a snapshot, as listed by `/keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub db: u64,
    /// Key bytes, lossily decoded as UTF-8.
    pub key: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Identity directories under the data root. A root that does not exist yet
/// simply has no hosts.
pub(crate) async fn hosts(
    State(state): State<Arc<CatalogState>>,
) -> Result<Json<Vec<String>>, CatalogError> {
    let names = match read_names(&state.data_dir, true).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        other => other?,
    };
    Ok(Json(names))
}

pub(crate) async fn list(
    State(state): State<Arc<CatalogState>>,
    Query(q): Query<HostQuery>,
) -> Result<Json<Vec<String>>, CatalogError> {
    let dir = state.resolve(&q.host, None)?;
    let names = read_names(&dir, false)
        .await
        .map_err(|e| CatalogError::from_io(e, &q.host))?
        .into_iter()
        .filter(|name| name.ends_with(SNAPSHOT_SUFFIX))
        .collect();
    Ok(Json(names))
}

pub(crate) async fn download(
    State(state): State<Arc<CatalogState>>,
    Path((host, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, CatalogError> {
    let path = state.resolve(&host, Some(&file))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CatalogError::from_io(e, &format!("{host}/{file}")))?;
    debug!(path = %path.display(), bytes = bytes.len(), "serving snapshot");
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

pub(crate) async fn keys(
    State(state): State<Arc<CatalogState>>,
    Query(q): Query<FileQuery>,
) -> Result<Json<Vec<KeyEntry>>, CatalogError> {
    let path = state.resolve(&q.host, Some(&q.file))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CatalogError::from_io(e, &format!("{}/{}", q.host, q.file)))?;

    let parsed = tokio::task::spawn_blocking(move || RdbReader::parse(&bytes))
        .await
        .map_err(|e| CatalogError::Internal(e.to_string()))?
        .map_err(|source| CatalogError::Unparsable {
            file: q.file.clone(),
            source,
        })?;

    let entries = parsed
        .databases
        .iter()
        .flat_map(|db| {
            db.entries.iter().map(move |entry| KeyEntry {
                db: db.index,
                key: String::from_utf8_lossy(&entry.key).into_owned(),
                type_name: entry.type_name().to_string(),
            })
        })
        .collect();
    Ok(Json(entries))
}

/// Sorted UTF-8 entry names of `dir`, keeping only directories when `dirs`
/// is set and only regular files otherwise.
async fn read_names(dir: &std::path::Path, dirs: bool) -> io::Result<Vec<String>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let file_type = entry.file_type().await?;
        let wanted = if dirs {
            file_type.is_dir()
        } else {
            file_type.is_file()
        };
        if !wanted {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
