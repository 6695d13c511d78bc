use anyhow::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use votes_core::resolve::{DirectoryLookup, RemoteMep};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("invalid directory url: {0}")]
    Url(String),
    #[error("directory request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("directory returned an undecodable body: {0}")]
    Decode(#[from] serde_json::Error),
}

// Blocking client for the remote representative directory. Error pages come
// back as HTML, so every decode failure is a miss rather than a fault.
pub struct DirectoryClient {
    http: Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct MepDocument {
    #[serde(rename = "UserID")]
    user_id: Value,
    #[serde(rename = "Name")]
    name: MepName,
}

#[derive(Debug, Deserialize)]
struct MepName {
    full: String,
}

#[derive(Debug, Deserialize)]
struct DossierDocument {
    procedure: DossierProcedure,
}

#[derive(Debug, Deserialize)]
struct DossierProcedure {
    title: String,
}

impl DirectoryClient {
    pub fn new(base: &str) -> Result<Self, DirectoryError> {
        let base = Url::parse(base).map_err(|err| DirectoryError::Url(err.to_string()))?;
        Ok(Self { http: Client::new(), base })
    }

    // Builds <base>/<segments...>?format=json, percent-escaping each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| DirectoryError::Url("directory base cannot hold a path".into()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url.set_query(Some("format=json"));
        Ok(url)
    }

    fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, DirectoryError> {
        debug!(%url, "directory request");
        let body = self.http.get(url).send()?.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

// The directory emits UserID as a number in some revisions and a string in
// others.
fn remote_id_text(user_id: &Value) -> Option<String> {
    match user_id {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

impl DirectoryLookup for DirectoryClient {
    fn mep_by_name(&self, name: &str) -> Result<RemoteMep> {
        let url = self.endpoint(&["mep", name])?;
        let document: MepDocument = self.fetch_json(url)?;
        let remote_id = remote_id_text(&document.user_id)
            .ok_or_else(|| anyhow::anyhow!("directory UserID is neither number nor string"))?;
        Ok(RemoteMep { remote_id, full_name: document.name.full })
    }

    fn dossier_title(&self, reference: &str) -> Result<Option<String>> {
        let url = self.endpoint(&["dossier", reference])?;
        match self.fetch_json::<DossierDocument>(url) {
            Ok(document) => Ok(Some(document.procedure.title)),
            Err(err) => {
                warn!("failed to get dossier {reference} from the directory: {err}");
                Ok(None)
            }
        }
    }
}
