//! Tenant isolation through physical namespace separation.
//!
//! Every tenant gets its own directory `base/{tenant_id}/`; record store,
//! index and cache keys all derive from a [`TenantNamespace`]. Nothing in
//! the store accepts an ambient tenant: it is always passed explicitly.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::vector::storage::VECTORS_FILE;

/// Maximum tenant id length in bytes.
pub const MAX_TENANT_ID_LEN: usize = 128;

/// Index file name inside a namespace.
pub const INDEX_FILE: &str = "index.ivf";

/// A validated tenant identifier.
///
/// Contains only ASCII letters, digits, `-` and `_`, so it is always a
/// single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validates `raw` as a tenant id.
    pub fn parse(raw: &str) -> RagResult<Self> {
        let reject = |reason: &'static str| {
            Err(RagError::InvalidTenantId {
                id: raw.to_string(),
                reason,
            })
        };

        if raw.is_empty() {
            return reject("tenant id is empty");
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return reject("tenant id is longer than 128 bytes");
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return reject("only ASCII letters, digits, '-' and '_' are allowed");
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl std::str::FromStr for TenantId {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Isolated storage scope of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantNamespace {
    tenant_id: TenantId,
    path: PathBuf,
}

impl TenantNamespace {
    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.path.join(INDEX_FILE)
    }

    /// Whether a record store has been written here.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.join(VECTORS_FILE).exists()
    }
}

/// Base directory under which tenant namespaces live.
#[derive(Debug, Clone)]
pub struct NamespaceRoot {
    base: PathBuf,
}

impl NamespaceRoot {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolves a tenant's namespace without touching the filesystem.
    pub fn resolve(&self, tenant_id: &str) -> RagResult<TenantNamespace> {
        let tenant_id = TenantId::parse(tenant_id)?;
        let path = self.base.join(tenant_id.as_str());
        Ok(TenantNamespace { tenant_id, path })
    }

    /// Resolves a tenant's namespace and creates its directory.
    ///
    /// Idempotent: repeated calls return the same path.
    pub fn namespace_for(&self, tenant_id: &str) -> RagResult<TenantNamespace> {
        let namespace = self.resolve(tenant_id)?;
        fs::create_dir_all(&namespace.path).map_err(|e| RagError::storage(&namespace.path, e))?;
        Ok(namespace)
    }

    /// Lists existing namespaces without opening them, sorted by id.
    ///
    /// Entries whose names are not valid tenant ids are skipped.
    pub fn list_tenants(&self) -> RagResult<Vec<TenantId>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RagError::storage(&self.base, e)),
        };

        let mut tenants = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RagError::storage(&self.base, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| RagError::storage(entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| TenantId::parse(name).ok())
            {
                tenants.push(id);
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}
