mod location;
pub(crate) use self::location::S3Location;
use crate::config::{ConfigError, Settings};
use aws_credential_types::Credentials;
use aws_sdk_s3::operation::{
    delete_object::DeleteObjectError, get_object::GetObjectError,
    list_buckets::ListBucketsError, list_objects_v2::ListObjectsV2Error,
};
use aws_sdk_s3::primitives::ByteStreamError;
use aws_sdk_s3::Client;
use aws_smithy_runtime_api::client::{orchestrator::HttpResponse, result::SdkError};
use std::future::Future;
use thiserror::Error;

/// The object-storage operations needed for staging incoming stock files
pub(crate) trait ObjectStore: Sync {
    /// Return the names of all buckets visible to the account
    fn list_buckets(&self) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Return the locations of all objects in `bucket` whose keys start with
    /// `prefix`
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<S3Location>, StorageError>> + Send;

    /// Download the full body of the object at `loc`
    fn get_object(
        &self,
        loc: &S3Location,
    ) -> impl Future<Output = Result<FetchedObject, StorageError>> + Send;

    fn delete_object(
        &self,
        loc: &S3Location,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// An object body along with the location it was actually served from
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FetchedObject {
    pub(crate) source: S3Location,
    pub(crate) body: Vec<u8>,
}

/// Storage client backed by AWS S3 (or an S3-compatible endpoint)
#[derive(Clone, Debug)]
pub(crate) struct S3Client {
    inner: Client,
}

impl S3Client {
    /// Construct a client using the static credentials, region, and optional
    /// endpoint from `settings`
    pub(crate) async fn new(settings: &Settings) -> Result<S3Client, ConfigError> {
        let credentials = Credentials::new(
            settings.key()?,
            settings.secret()?,
            None,
            None,
            "stocksync-config",
        );
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region()?.to_owned()))
            .credentials_provider(credentials);
        if let Some(endpoint) = settings.endpoint() {
            tracing::debug!(%endpoint, "Using custom S3 endpoint");
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
        if settings.endpoint().is_some() {
            s3_config = s3_config.force_path_style(true);
        }
        Ok(S3Client {
            inner: Client::from_conf(s3_config.build()),
        })
    }
}

impl ObjectStore for S3Client {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let output = self
            .inner
            .list_buckets()
            .send()
            .await
            .map_err(|source| StorageError::ListBuckets { source })?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(ToOwned::to_owned)
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<S3Location>, StorageError> {
        let mut stream = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut locations = Vec::new();
        while let Some(r) = stream.next().await {
            let page = r.map_err(|source| StorageError::ListObjects {
                bucket: bucket.to_owned(),
                prefix: prefix.to_owned(),
                source,
            })?;
            locations.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|key| S3Location::new(bucket, key)),
            );
        }
        Ok(locations)
    }

    async fn get_object(&self, loc: &S3Location) -> Result<FetchedObject, StorageError> {
        tracing::trace!(url = %loc, "Downloading object");
        let output = self
            .inner
            .get_object()
            .bucket(loc.bucket())
            .key(loc.key())
            .send()
            .await
            .map_err(|source| StorageError::Get {
                url: loc.clone(),
                source,
            })?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|source| StorageError::ReadBody {
                url: loc.clone(),
                source,
            })?
            .into_bytes()
            .to_vec();
        // The SDK does not report a redirected location, so the request
        // location is the served location.
        Ok(FetchedObject {
            source: loc.clone(),
            body,
        })
    }

    async fn delete_object(&self, loc: &S3Location) -> Result<(), StorageError> {
        tracing::trace!(url = %loc, "Deleting object");
        self.inner
            .delete_object()
            .bucket(loc.bucket())
            .key(loc.key())
            .send()
            .await
            .map_err(|source| StorageError::Delete {
                url: loc.clone(),
                source,
            })?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub(crate) enum StorageError {
    #[error("failed to list S3 buckets")]
    ListBuckets {
        source: SdkError<ListBucketsError, HttpResponse>,
    },
    #[error("failed to list S3 objects in bucket {bucket:?} with prefix {prefix:?}")]
    ListObjects {
        bucket: String,
        prefix: String,
        source: SdkError<ListObjectsV2Error, HttpResponse>,
    },
    #[error("failed to get {url}")]
    Get {
        url: S3Location,
        source: SdkError<GetObjectError, HttpResponse>,
    },
    #[error("failed to read body of {url}")]
    ReadBody {
        url: S3Location,
        source: ByteStreamError,
    },
    #[error("failed to delete {url}")]
    Delete {
        url: S3Location,
        source: SdkError<DeleteObjectError, HttpResponse>,
    },
    #[error("requested {url} but object was served from {served}")]
    SourceMismatch { url: S3Location, served: S3Location },
}
