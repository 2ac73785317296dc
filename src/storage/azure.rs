use super::{ObjectStore, StoreError, StoreErrorCode};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::Client;
use std::time::Duration;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";

/// Azure Blob Storage container addressed with a SAS token.
#[derive(Clone)]
pub struct AzureBlobStore {
    account_url: String,
    container: String,
    sas_token: String,
    client: Client,
}

impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("account_url", &self.account_url)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    pub fn new(
        account_url: &str,
        container: &str,
        sas_token: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        Url::parse(account_url).map_err(|e| {
            StoreError::new(
                StoreErrorCode::Validation,
                format!("invalid account url `{account_url}`: {e}"),
            )
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.to_string()))?;
        Ok(Self {
            account_url: account_url.trim_end_matches('/').to_string(),
            container: container.to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
            client,
        })
    }

    fn blob_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.account_url)
            .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::new(
                    StoreErrorCode::Validation,
                    format!("account url `{}` cannot hold a path", self.account_url),
                )
            })?;
            segments.pop_if_empty().push(&self.container);
            for part in key.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
        }
        if !self.sas_token.is_empty() {
            url.set_query(Some(&self.sas_token));
        }
        Ok(url)
    }
}

impl ObjectStore for AzureBlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.blob_url(key)?;
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.without_url().to_string()))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::new(
                StoreErrorCode::NotFound,
                format!("blob {} not found", self.describe(key)),
            ));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("GET {} returned HTTP {status}: {body}", self.describe(key)),
            ));
        }
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.without_url().to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let url = self.blob_url(key)?;
        let resp = self
            .client
            .put(url)
            .header(BLOB_TYPE_HEADER, "BlockBlob")
            .body(bytes.to_vec())
            .send()
            .map_err(|e| StoreError::new(StoreErrorCode::Network, e.without_url().to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(StoreError::new(
                StoreErrorCode::Network,
                format!("PUT {} returned HTTP {status}: {body}", self.describe(key)),
            ));
        }
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("{}/{}/{}", self.account_url, self.container, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_url_encodes_segments_and_appends_sas() {
        let store = AzureBlobStore::new(
            "https://acct.blob.core.windows.net/",
            "datalake",
            "?sv=2022&sig=abc",
            Duration::from_secs(5),
        )
        .unwrap();
        let url = store.blob_url("kobo/sipca index.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/datalake/kobo/sipca%20index.json?sv=2022&sig=abc"
        );
        assert_eq!(
            store.describe("kobo/x.csv"),
            "https://acct.blob.core.windows.net/datalake/kobo/x.csv"
        );
    }

    #[test]
    fn rejects_invalid_account_url() {
        let err = AzureBlobStore::new("not a url", "c", "", Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code, StoreErrorCode::Validation);
    }
}
