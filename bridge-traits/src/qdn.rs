//! QDN request bridge and wire types.
//!
//! The host exposes a single polymorphic RPC entry point whose request and
//! response shapes depend on the action. Here that surface is modeled as a
//! pair of tagged enums, [`BridgeRequest`] and [`BridgeResponse`], dispatched
//! through [`QdnBridge::call`]. Typed helpers on [`QdnBridgeExt`] match the
//! response variant at the boundary so callers never inspect loose JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Byte size the network uses for placeholder payloads left behind by a
/// deletion. Metadata with exactly this size is a tombstone.
pub const PLACEHOLDER_SIZE: u64 = 32;

// ============================================================================
// Resource identity
// ============================================================================

/// Coarse content-type tag that forms part of a resource's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Service {
    Video,
    Audio,
    Podcast,
    Image,
    Thumbnail,
    Document,
    Json,
    File,
    Attachment,
    Playlist,
    BlogPost,
    Website,
    App,
    Other(String),
}

impl Service {
    pub fn as_str(&self) -> &str {
        match self {
            Service::Video => "VIDEO",
            Service::Audio => "AUDIO",
            Service::Podcast => "PODCAST",
            Service::Image => "IMAGE",
            Service::Thumbnail => "THUMBNAIL",
            Service::Document => "DOCUMENT",
            Service::Json => "JSON",
            Service::File => "FILE",
            Service::Attachment => "ATTACHMENT",
            Service::Playlist => "PLAYLIST",
            Service::BlogPost => "BLOG_POST",
            Service::Website => "WEBSITE",
            Service::App => "APP",
            Service::Other(s) => s.as_str(),
        }
    }

    /// Services whose bodies are streamed rather than fetched whole.
    pub fn is_media(&self) -> bool {
        matches!(self, Service::Video | Service::Audio | Service::Podcast)
    }
}

impl FromStr for Service {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(BridgeError::OperationFailed(
                "service must not be empty".to_string(),
            ));
        }
        Ok(match s {
            "VIDEO" => Service::Video,
            "AUDIO" => Service::Audio,
            "PODCAST" => Service::Podcast,
            "IMAGE" => Service::Image,
            "THUMBNAIL" => Service::Thumbnail,
            "DOCUMENT" => Service::Document,
            "JSON" => Service::Json,
            "FILE" => Service::File,
            "ATTACHMENT" => Service::Attachment,
            "PLAYLIST" => Service::Playlist,
            "BLOG_POST" => Service::BlogPost,
            "WEBSITE" => Service::Website,
            "APP" => Service::App,
            other => Service::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for Service {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Service> for String {
    fn from(value: Service) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity `(service, name, identifier)` of a resource.
///
/// Every cache and status map keys by this triple; two resources with the
/// same triple are the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub service: Service,
    pub name: String,
    pub identifier: String,
}

impl ResourceKey {
    pub fn new(service: Service, name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            service,
            name: name.into(),
            identifier: identifier.into(),
        }
    }

    /// String form used for persisted keys: `service-name-identifier`.
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.service, self.name, self.identifier)
    }

    /// All three fields are present (non-blank).
    pub fn is_complete(&self) -> bool {
        !self.service.as_str().trim().is_empty()
            && !self.name.trim().is_empty()
            && !self.identifier.trim().is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.name, self.identifier)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Descriptive fields attached to a published resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Search-result metadata for one resource.
///
/// `placeholder` is derived once, when the record is deserialized from the
/// wire: a reported size of [`PLACEHOLDER_SIZE`] marks a deleted resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireMetadata")]
pub struct QdnMetadata {
    pub service: Service,
    pub name: String,
    pub identifier: String,
    pub size: u64,
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceDetails>,
    #[serde(skip_serializing)]
    pub placeholder: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMetadata {
    service: Service,
    name: String,
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    updated: Option<i64>,
    #[serde(default)]
    metadata: Option<ResourceDetails>,
}

impl From<WireMetadata> for QdnMetadata {
    fn from(wire: WireMetadata) -> Self {
        Self {
            placeholder: wire.size == PLACEHOLDER_SIZE,
            service: wire.service,
            name: wire.name,
            identifier: wire.identifier,
            size: wire.size,
            created: wire.created,
            updated: wire.updated,
            metadata: wire.metadata,
        }
    }
}

impl QdnMetadata {
    pub fn new(key: ResourceKey, size: u64, created: i64) -> Self {
        Self {
            placeholder: size == PLACEHOLDER_SIZE,
            service: key.service,
            name: key.name,
            identifier: key.identifier,
            size,
            created,
            updated: None,
            metadata: None,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.service.clone(), self.name.clone(), self.identifier.clone())
    }

    /// Tombstone left by a deletion (or a resource that never had content).
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.as_ref()?.mime_type.as_deref()
    }
}

// ============================================================================
// Search parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchMode {
    All,
    Latest,
}

/// Filters for `SEARCH_QDN_RESOURCES`. Field order is stable, so the JSON
/// serialization doubles as a deterministic cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub prefix: bool,
    #[serde(default)]
    pub exact_match_names: bool,
    #[serde(default)]
    pub exclude_blocked: bool,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default)]
    pub reverse: bool,
    /// Maximum results; `0` means no limit.
    #[serde(default)]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Only results created strictly before this timestamp (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<i64>,
}

impl SearchParams {
    pub fn for_service(service: Service) -> Self {
        Self {
            service: Some(service),
            reverse: true,
            ..Self::default()
        }
    }

    /// Exact lookup of a single resource.
    pub fn exact(key: &ResourceKey) -> Self {
        Self {
            service: Some(key.service.clone()),
            identifier: Some(key.identifier.clone()),
            names: vec![key.name.clone()],
            exact_match_names: true,
            include_metadata: true,
            limit: 1,
            ..Self::default()
        }
    }

    /// Query-string pairs for the gateway's `/arbitrary/resources/search`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(service) = &self.service {
            pairs.push(("service", service.to_string()));
        }
        if let Some(identifier) = &self.identifier {
            pairs.push(("identifier", identifier.clone()));
        }
        for name in &self.names {
            pairs.push(("name", name.clone()));
        }
        if let Some(query) = &self.query {
            pairs.push(("query", query.clone()));
        }
        if let Some(title) = &self.title {
            pairs.push(("title", title.clone()));
        }
        if let Some(description) = &self.description {
            pairs.push(("description", description.clone()));
        }
        for keyword in &self.keywords {
            pairs.push(("keywords", keyword.clone()));
        }
        if let Some(mode) = self.mode {
            let mode = match mode {
                SearchMode::All => "ALL",
                SearchMode::Latest => "LATEST",
            };
            pairs.push(("mode", mode.to_string()));
        }
        pairs.push(("prefix", self.prefix.to_string()));
        pairs.push(("exactmatchnames", self.exact_match_names.to_string()));
        pairs.push(("excludeblocked", self.exclude_blocked.to_string()));
        pairs.push(("includemetadata", self.include_metadata.to_string()));
        pairs.push(("reverse", self.reverse.to_string()));
        pairs.push(("limit", self.limit.to_string()));
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        if let Some(before) = self.before {
            pairs.push(("before", before.to_string()));
        }
        if let Some(after) = self.after {
            pairs.push(("after", after.to_string()));
        }
        pairs
    }
}

// ============================================================================
// Resource status
// ============================================================================

/// Availability of a resource on the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Initial,
    Searching,
    Downloading,
    Downloaded,
    Building,
    BuildFailed,
    Ready,
    Refetching,
    FailedToDownload,
    NotPublished,
    MissingData,
    Unsupported,
    Blocked,
    Published,
}

impl Status {
    /// No further polling happens from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ready | Status::FailedToDownload)
    }
}

/// Live status of a resource as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub status: Status,
    #[serde(default)]
    pub local_chunk_count: u64,
    #[serde(default)]
    pub total_chunk_count: u64,
    #[serde(default)]
    pub percent_loaded: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ResourceStatus {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            local_chunk_count: 0,
            total_chunk_count: 0,
            percent_loaded: 0.0,
            path: None,
            filename: None,
        }
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

// ============================================================================
// Bridge requests and responses
// ============================================================================

/// One resource inside a `PUBLISH_MULTIPLE_QDN_RESOURCES` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResource {
    pub service: Service,
    pub name: String,
    pub identifier: String,
    pub data64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl PublishResource {
    /// Zero-length payload that supersedes (deletes) an existing resource.
    pub fn placeholder(key: &ResourceKey) -> Self {
        Self {
            service: key.service.clone(),
            name: key.name.clone(),
            identifier: key.identifier.clone(),
            data64: String::new(),
            title: None,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Actions understood by the host bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeRequest {
    SearchQdnResources(SearchParams),
    PublishMultipleQdnResources { resources: Vec<PublishResource> },
    EncryptData { data64: String },
    GetQdnResourceStatus {
        #[serde(flatten)]
        key: ResourceKey,
        build: bool,
    },
    GetBalance { address: String },
    GetUserAccount,
}

impl BridgeRequest {
    pub fn action(&self) -> &'static str {
        match self {
            BridgeRequest::SearchQdnResources(_) => "SEARCH_QDN_RESOURCES",
            BridgeRequest::PublishMultipleQdnResources { .. } => "PUBLISH_MULTIPLE_QDN_RESOURCES",
            BridgeRequest::EncryptData { .. } => "ENCRYPT_DATA",
            BridgeRequest::GetQdnResourceStatus { .. } => "GET_QDN_RESOURCE_STATUS",
            BridgeRequest::GetBalance { .. } => "GET_BALANCE",
            BridgeRequest::GetUserAccount => "GET_USER_ACCOUNT",
        }
    }
}

/// One response variant per request variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BridgeResponse {
    Resources(Vec<QdnMetadata>),
    Published,
    Encrypted(String),
    Status(ResourceStatus),
    Balance(f64),
    UserAccount(UserAccount),
}

impl BridgeResponse {
    fn variant(&self) -> &'static str {
        match self {
            BridgeResponse::Resources(_) => "resources",
            BridgeResponse::Published => "published",
            BridgeResponse::Encrypted(_) => "encrypted",
            BridgeResponse::Status(_) => "status",
            BridgeResponse::Balance(_) => "balance",
            BridgeResponse::UserAccount(_) => "user_account",
        }
    }
}

/// Host-provided RPC surface for higher-trust actions.
///
/// The core never inspects or controls the transport behind this trait.
#[async_trait]
pub trait QdnBridge: Send + Sync {
    /// Perform one bridge action.
    async fn call(&self, request: BridgeRequest) -> Result<BridgeResponse>;

    /// Perform a long-running action (e.g. publish) with an explicit budget.
    ///
    /// Implementations backed by a transport with native deadlines should
    /// override this; the default defers to [`QdnBridge::call`].
    async fn call_with_timeout(
        &self,
        request: BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeResponse> {
        let _ = timeout;
        self.call(request).await
    }
}

fn unexpected(action: &str, got: &BridgeResponse) -> BridgeError {
    BridgeError::UnexpectedResponse {
        action: action.to_string(),
        message: format!("got `{}` response", got.variant()),
    }
}

/// Typed wrappers over [`QdnBridge::call`].
#[async_trait]
pub trait QdnBridgeExt: QdnBridge {
    async fn search_resources(&self, params: SearchParams) -> Result<Vec<QdnMetadata>> {
        let request = BridgeRequest::SearchQdnResources(params);
        let action = request.action();
        match self.call(request).await? {
            BridgeResponse::Resources(items) => Ok(items),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn publish_multiple(
        &self,
        resources: Vec<PublishResource>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let request = BridgeRequest::PublishMultipleQdnResources { resources };
        let action = request.action();
        let response = match timeout {
            Some(budget) => self.call_with_timeout(request, budget).await?,
            None => self.call(request).await?,
        };
        match response {
            BridgeResponse::Published => Ok(()),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn resource_status(&self, key: ResourceKey, build: bool) -> Result<ResourceStatus> {
        let request = BridgeRequest::GetQdnResourceStatus { key, build };
        let action = request.action();
        match self.call(request).await? {
            BridgeResponse::Status(status) => Ok(status),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn encrypt_data(&self, data64: String) -> Result<String> {
        let request = BridgeRequest::EncryptData { data64 };
        let action = request.action();
        match self.call(request).await? {
            BridgeResponse::Encrypted(data) => Ok(data),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn balance(&self, address: String) -> Result<f64> {
        let request = BridgeRequest::GetBalance { address };
        let action = request.action();
        match self.call(request).await? {
            BridgeResponse::Balance(value) => Ok(value),
            other => Err(unexpected(action, &other)),
        }
    }

    async fn user_account(&self) -> Result<UserAccount> {
        let request = BridgeRequest::GetUserAccount;
        let action = request.action();
        match self.call(request).await? {
            BridgeResponse::UserAccount(account) => Ok(account),
            other => Err(unexpected(action, &other)),
        }
    }
}

impl<T: QdnBridge + ?Sized> QdnBridgeExt for T {}
