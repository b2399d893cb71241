//! Capability classes, providers and the credential registry.
//!
//! This module provides:
//! - [`CapabilityClass`] - One entry of the fixed allow-list of vendor API clients
//! - [`ProviderKind`] - The three API personas (marketplace, content provider, supplier)
//! - [`ApiClient`] / [`ProviderClient`] - Clients bound to a signed-request configuration
//! - [`CredentialRegistry`] - Resolves credential identities into ready clients
//!
//! Capability classes are addressed by a namespace path of the form
//! `{provider}::{region}::{Name}`, for example `mp::us::OrdersApi`. The region
//! segment selects the vendor country and must parse as a [`Country`].
//!
//! # Example
//!
//! ```rust,ignore
//! use marketkey_core::{CredentialId, CredentialRegistry};
//!
//! async fn orders(registry: &CredentialRegistry) -> Result<(), marketkey_core::MarketkeyError> {
//!     let client = registry.build_client("mp::us::OrdersApi", CredentialId::new(42)).await?;
//!     let headers = client.auth_headers("/v3/orders", "GET", "")?;
//!     Ok(())
//! }
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::{ApiConfiguration, ConfigError};
use crate::credentials::{CredentialContext, Credentials};
use crate::error::MarketkeyError;
use crate::model::{Country, CredentialId};

/// Error type for registry lookups.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The path is not in the capability allow-list or its region is unknown.
    #[error("invalid capability class: {path}")]
    InvalidCapability { path: String },

    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },

    /// The provider offers no API of that name for its country.
    #[error("provider {provider} has no {name} API for {country}")]
    UnknownApi {
        provider: ProviderKind,
        country: Country,
        name: String,
    },
}

impl RegistryError {
    fn invalid_capability(path: &str) -> Self {
        Self::InvalidCapability {
            path: path.to_string(),
        }
    }
}

/// API persona grouping a set of capability classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    Marketplace,
    ContentProvider,
    Supplier,
}

impl ProviderKind {
    /// Name accepted by [`CredentialRegistry::build_provider`].
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Marketplace => "marketplace",
            ProviderKind::ContentProvider => "contentProvider",
            ProviderKind::Supplier => "supplier",
        }
    }

    /// First segment of the capability class paths of this provider.
    pub fn namespace(&self) -> &'static str {
        match self {
            ProviderKind::Marketplace => "mp",
            ProviderKind::ContentProvider => "cp",
            ProviderKind::Supplier => "supplier",
        }
    }

    pub fn all() -> [ProviderKind; 3] {
        [
            ProviderKind::Marketplace,
            ProviderKind::ContentProvider,
            ProviderKind::Supplier,
        ]
    }

    fn from_namespace(namespace: &str) -> Option<Self> {
        Self::all().into_iter().find(|p| p.namespace() == namespace)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| RegistryError::UnknownProvider {
                name: s.to_string(),
            })
    }
}

/// A vendor API client class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityClass {
    pub provider: ProviderKind,
    pub country: Country,
    pub name: &'static str,
}

const fn class(provider: ProviderKind, country: Country, name: &'static str) -> CapabilityClass {
    CapabilityClass {
        provider,
        country,
        name,
    }
}

use Country::{Ca, Mx, Us};
use ProviderKind::{ContentProvider as Cp, Marketplace as Mp, Supplier as Sp};

/// The supported capability classes.
pub static API_CLASSES: [CapabilityClass; 45] = [
    class(Mp, Us, "AssortmentRecommendationsApi"),
    class(Mp, Mx, "AuthenticationApi"),
    class(Mp, Us, "AuthenticationApi"),
    class(Mp, Ca, "EventsApi"),
    class(Mp, Ca, "FeedsApi"),
    class(Mp, Mx, "FeedsApi"),
    class(Mp, Us, "FeedsApi"),
    class(Mp, Us, "FulfillmentApi"),
    class(Mp, Us, "InsightsApi"),
    class(Mp, Ca, "InventoryApi"),
    class(Mp, Mx, "InventoryApi"),
    class(Mp, Us, "InventoryApi"),
    class(Mp, Ca, "ItemsApi"),
    class(Mp, Mx, "ItemsApi"),
    class(Mp, Us, "ItemsApi"),
    class(Mp, Us, "LagTimeApi"),
    class(Mp, Us, "NotificationsApi"),
    class(Mp, Us, "OnRequestReportsApi"),
    class(Mp, Ca, "OrdersApi"),
    class(Mp, Mx, "OrdersApi"),
    class(Mp, Us, "OrdersApi"),
    class(Mp, Ca, "PricesApi"),
    class(Mp, Mx, "PricesApi"),
    class(Mp, Us, "PricesApi"),
    class(Mp, Ca, "PromotionsApi"),
    class(Mp, Us, "PromotionsApi"),
    class(Mp, Ca, "ReportsApi"),
    class(Mp, Mx, "ReportsApi"),
    class(Mp, Us, "ReportsApi"),
    class(Mp, Mx, "ReturnsApi"),
    class(Mp, Us, "ReturnsApi"),
    class(Mp, Us, "ReviewsApi"),
    class(Mp, Ca, "InternationalShippingApi"),
    class(Mp, Mx, "InternationalShippingApi"),
    class(Mp, Us, "RulesApi"),
    class(Mp, Us, "SettingsApi"),
    class(Mp, Us, "UtilitiesApi"),
    class(Cp, Us, "FeedsApi"),
    class(Sp, Us, "DsvCostApi"),
    class(Sp, Us, "DsvInventoryApi"),
    class(Sp, Us, "DsvLagTimeApi"),
    class(Sp, Us, "DsvOrdersApi"),
    class(Sp, Us, "FeedsApi"),
    class(Sp, Us, "ItemsApi"),
    class(Sp, Us, "ReportsApi"),
];

impl CapabilityClass {
    /// Namespace path, e.g. `mp::us::OrdersApi`.
    pub fn path(&self) -> String {
        format!(
            "{}::{}::{}",
            self.provider.namespace(),
            self.country.as_str(),
            self.name
        )
    }

    /// Look up a path in the allow-list.
    pub fn parse(path: &str) -> Result<&'static CapabilityClass, RegistryError> {
        let mut segments = path.split("::");
        let (Some(namespace), Some(region), Some(name), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(RegistryError::invalid_capability(path));
        };

        let provider = ProviderKind::from_namespace(namespace)
            .ok_or_else(|| RegistryError::invalid_capability(path))?;
        let country: Country = region
            .parse()
            .map_err(|_| RegistryError::invalid_capability(path))?;

        API_CLASSES
            .iter()
            .find(|c| c.provider == provider && c.country == country && c.name == name)
            .ok_or_else(|| RegistryError::invalid_capability(path))
    }

    /// Capability classes of one provider and country.
    pub fn for_provider(
        provider: ProviderKind,
        country: Country,
    ) -> impl Iterator<Item = &'static CapabilityClass> {
        API_CLASSES
            .iter()
            .filter(move |c| c.provider == provider && c.country == country)
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Country selected by the region segment of a class path.
///
/// The region is the segment immediately before the class name.
pub fn infer_region(path: &str) -> Result<Country, RegistryError> {
    let segments: Vec<&str> = path.split("::").collect();
    if segments.len() < 2 {
        return Err(RegistryError::invalid_capability(path));
    }

    segments[segments.len() - 2]
        .parse()
        .map_err(|_| RegistryError::invalid_capability(path))
}

/// A capability client bound to a configuration.
#[derive(Debug, Clone)]
pub struct ApiClient {
    class: &'static CapabilityClass,
    config: ApiConfiguration,
}

impl ApiClient {
    pub fn new(class: &'static CapabilityClass, config: ApiConfiguration) -> Self {
        Self { class, config }
    }

    pub fn class(&self) -> &'static CapabilityClass {
        self.class
    }

    pub fn config(&self) -> &ApiConfiguration {
        &self.config
    }

    /// Authentication headers for one call made by this client.
    pub fn auth_headers(
        &self,
        path: &str,
        method: &str,
        query: &str,
    ) -> Result<Vec<(&'static str, String)>, ConfigError> {
        self.config.auth_headers(path, method, query)
    }
}

/// A provider-scoped facade handing out capability clients.
///
/// The configuration can be replaced in place; clients handed out earlier keep
/// the configuration they were built with.
#[derive(Debug)]
pub struct ProviderClient {
    kind: ProviderKind,
    config: RwLock<ApiConfiguration>,
}

impl ProviderClient {
    pub fn new(kind: ProviderKind, config: ApiConfiguration) -> Self {
        Self {
            kind,
            config: RwLock::new(config),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ApiConfiguration {
        self.config.read().clone()
    }

    /// Re-point this provider at fresh credentials.
    pub fn replace_config(&self, config: &ApiConfiguration) {
        config.apply_to(&mut self.config.write());
    }

    /// Capability classes available for the current country.
    pub fn apis(&self) -> Vec<&'static CapabilityClass> {
        CapabilityClass::for_provider(self.kind, self.config.read().country()).collect()
    }

    /// Capability client `name` sharing this provider's configuration.
    pub fn api(&self, name: &str) -> Result<ApiClient, RegistryError> {
        let config = self.config();
        let country = config.country();

        let class = CapabilityClass::for_provider(self.kind, country)
            .find(|c| c.name == name)
            .ok_or_else(|| RegistryError::UnknownApi {
                provider: self.kind,
                country,
                name: name.to_string(),
            })?;

        Ok(ApiClient::new(class, config))
    }
}

/// Identity of a credential record, or the record itself.
#[derive(Debug, Clone)]
pub enum CredentialRef {
    Id(CredentialId),
    Record(Box<Credentials>),
}

impl From<CredentialId> for CredentialRef {
    fn from(id: CredentialId) -> Self {
        CredentialRef::Id(id)
    }
}

impl From<u64> for CredentialRef {
    fn from(id: u64) -> Self {
        CredentialRef::Id(CredentialId::new(id))
    }
}

impl From<Credentials> for CredentialRef {
    fn from(credentials: Credentials) -> Self {
        CredentialRef::Record(Box::new(credentials))
    }
}

/// Builds capability and provider clients from credential records.
///
/// Placeholder clients for every capability class are registered at
/// construction. They carry a dummy configuration and fail on any signing
/// attempt.
pub struct CredentialRegistry {
    ctx: Arc<CredentialContext>,
    placeholders: BTreeMap<String, ApiClient>,
    providers: Mutex<HashMap<(ProviderKind, CredentialId), Arc<ProviderClient>>>,
}

impl CredentialRegistry {
    pub fn new(ctx: Arc<CredentialContext>) -> Result<Self, RegistryError> {
        let placeholders = API_CLASSES
            .iter()
            .map(|class| {
                let path = class.path();
                let config = ApiConfiguration::placeholder(infer_region(&path)?);
                Ok((path, ApiClient::new(class, config)))
            })
            .collect::<Result<BTreeMap<_, _>, RegistryError>>()?;

        Ok(Self {
            ctx,
            placeholders,
            providers: Mutex::new(HashMap::new()),
        })
    }

    pub fn context(&self) -> &CredentialContext {
        &self.ctx
    }

    /// Load the record an identity refers to.
    pub async fn resolve_credential(
        &self,
        credential: impl Into<CredentialRef>,
    ) -> Result<Credentials, MarketkeyError> {
        match credential.into() {
            CredentialRef::Id(id) => Credentials::find(&self.ctx, id).await,
            CredentialRef::Record(credentials) => Ok(*credentials),
        }
    }

    /// Build a capability client authenticated with a credential record.
    ///
    /// The class path is validated before any I/O.
    pub async fn build_client(
        &self,
        path: &str,
        credential: impl Into<CredentialRef>,
    ) -> Result<ApiClient, MarketkeyError> {
        let class = CapabilityClass::parse(path)?;
        let mut credentials = self.resolve_credential(credential).await?;
        let config = credentials.to_api_configuration(&self.ctx, false).await?;

        debug!(class = %class, credentials = %credentials.id(), "built capability client");
        Ok(ApiClient::new(class, config))
    }

    /// Build a provider facade authenticated with a credential record.
    ///
    /// With `clone` an independent instance is returned. Otherwise the shared
    /// instance for this provider and record is returned, its configuration
    /// replaced by the freshly resolved one.
    pub async fn build_provider(
        &self,
        name: &str,
        credential: impl Into<CredentialRef>,
        clone: bool,
    ) -> Result<Arc<ProviderClient>, MarketkeyError> {
        let kind: ProviderKind = name.parse()?;
        let mut credentials = self.resolve_credential(credential).await?;
        let config = credentials.to_api_configuration(&self.ctx, false).await?;

        if clone {
            return Ok(Arc::new(ProviderClient::new(kind, config)));
        }

        let mut providers = self.providers.lock();
        let shared = providers
            .entry((kind, credentials.id()))
            .or_insert_with(|| Arc::new(ProviderClient::new(kind, config.clone())));
        shared.replace_config(&config);

        Ok(shared.clone())
    }

    /// Pre-registered placeholder client for a class path.
    pub fn placeholder(&self, path: &str) -> Result<&ApiClient, RegistryError> {
        let class = CapabilityClass::parse(path)?;
        self.placeholders
            .get(&class.path())
            .ok_or_else(|| RegistryError::invalid_capability(path))
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &ApiClient> {
        self.placeholders.values()
    }
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("placeholders", &self.placeholders.len())
            .field("providers", &self.providers.lock().len())
            .finish()
    }
}
