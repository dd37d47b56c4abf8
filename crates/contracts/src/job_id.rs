//! JobId - Cheap-to-clone backend job identifier
//!
//! Used for both bulk job ids and per-recipient job ids. Ids are only
//! meaningful within one dispatch run.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Job identifier with cheap cloning.
///
/// Internally uses `Arc<str>`: the reconciler clones ids into its processed
/// set, result records and per-query tasks, so a clone is a refcount bump.
///
/// # Examples
/// ```
/// use contracts::JobId;
///
/// let id: JobId = "bulk-42".into();
/// let id2 = id.clone();
/// assert_eq!(id, id2);
/// assert_eq!(id.as_str(), "bulk-42");
/// ```
#[derive(Clone, Default)]
pub struct JobId(Arc<str>);

impl JobId {
    /// Create a new JobId from a string slice.
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Get the underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for JobId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for JobId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for JobId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&String> for JobId {
    #[inline]
    fn from(s: &String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({:?})", self.0)
    }
}

impl PartialEq for JobId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for JobId {}

impl PartialEq<str> for JobId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for JobId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl PartialEq<String> for JobId {
    #[inline]
    fn eq(&self, other: &String) -> bool {
        self.0.as_ref() == other
    }
}

// Must hash like `str` so `HashSet<JobId>` can be queried with `&str`.
impl Hash for JobId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

// Queue backends hand out numeric ids as often as string ids.
impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct JobIdVisitor;

        impl serde::de::Visitor<'_> for JobIdVisitor {
            type Value = JobId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a job id string or integer")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<JobId, E> {
                Ok(JobId::from(v))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<JobId, E> {
                Ok(JobId::from(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<JobId, E> {
                Ok(JobId::from(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<JobId, E> {
                Ok(JobId::from(v.to_string()))
            }
        }

        deserializer.deserialize_any(JobIdVisitor)
    }
}
