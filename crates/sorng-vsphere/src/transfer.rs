//! Datastore file upload through the `/folder` HTTP endpoint.

use crate::api::VimApi;
use crate::error::{VsphereErrorKind, VsphereResult};
use crate::inventory::find;
use crate::session::session_cookie_to_map;
use crate::types::*;

use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use url::Url;

/// Uploads files into datastores using the session's cookie.
pub struct FileTransfer<'a> {
    api: &'a dyn VimApi,
    http: reqwest::Client,
    base_url: Option<Url>,
}

impl<'a> FileTransfer<'a> {
    /// Certificate validation is always disabled for uploads.
    pub fn new(api: &'a dyn VimApi) -> VsphereResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { api, http, base_url: None })
    }

    /// Send uploads to `base_url` instead of `https://<cloud_url>:443`.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    fn upload_url(&self, cloud_url: &str, folder: &str, file: &str, location: &DatastoreLocation) -> VsphereResult<Url> {
        let mut url = match &self.base_url {
            Some(base) => base.clone(),
            None => Url::parse(&format!("https://{cloud_url}:443"))?,
        };
        url.set_path(&format!("/folder/{folder}/{file}"));
        url.query_pairs_mut()
            .append_pair("dsName", &location.datastore_name)
            .append_pair("dcPath", &location.datacenter_name);
        Ok(url)
    }

    /// PUT `data` as `<upload_folder>/<upload_file>` on the datastore.
    ///
    /// `Ok(false)` when the datastore is unknown or the server answers
    /// anything but 200 / 201. A malformed session cookie or a transport
    /// failure is an error.
    pub async fn upload_file_to_datastore(
        &self,
        cloud_url: &str,
        datastore_name: &str,
        data: Vec<u8>,
        upload_folder: &str,
        upload_file: &str,
    ) -> VsphereResult<bool> {
        let datastore = match find(self.api, ObjectKind::Datastore, datastore_name).await {
            Ok(ds) => ds,
            Err(e) if e.kind == VsphereErrorKind::NotFound => {
                log::warn!("Upload skipped: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let location = self.api.datastore_location(&datastore.moref).await?;

        let cookie = session_cookie_to_map(self.api.session_cookie().as_deref())?
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        let url = self.upload_url(cloud_url, upload_folder, upload_file, &location)?;
        log::info!("Uploading {} bytes to {url}", data.len());

        let resp = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(COOKIE, cookie)
            .body(data)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            Ok(true)
        } else {
            log::warn!("Upload to {datastore_name} answered {status}");
            Ok(false)
        }
    }
}
