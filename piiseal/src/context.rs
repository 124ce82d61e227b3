//! Identifier types and field context for encryption and audit logging.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant (realm) identifier, the isolation boundary for the enable flag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

/// Owner (user) record identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            /// Creates an identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(TenantId);
string_id!(OwnerId);

/// Locates one field of one owner record.
///
/// Carried by integrity failures and used as the structured context of
/// audit log lines.
///
/// # Example
///
/// ```
/// use piiseal::context::{FieldContext, OwnerId, TenantId};
///
/// let ctx = FieldContext::new(TenantId::from("acme"), OwnerId::from("u-42"), "email");
/// assert_eq!(ctx.to_string(), "acme|u-42|email");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldContext {
    tenant: TenantId,
    owner: OwnerId,
    field: String,
}

impl FieldContext {
    /// Creates a new field context.
    #[must_use]
    pub fn new(tenant: TenantId, owner: OwnerId, field: impl Into<String>) -> Self {
        Self { tenant, owner, field: field.into() }
    }

    /// Returns the tenant.
    #[must_use]
    pub const fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the owner.
    #[must_use]
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Returns the field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.tenant, self.owner, self.field)
    }
}
