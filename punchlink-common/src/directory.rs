//! Request-scoped user directory
//!
//! Built from a full device user listing at the start of a pull sync and
//! dropped when the sync ends, so renames on the device show up on the next
//! pull.

use std::collections::HashMap;

use crate::model::{AttendanceEvent, DeviceUser};

/// `user_id -> name` lookup table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDirectory {
    names: HashMap<String, String>,
}

impl UserDirectory {
    pub fn from_users(users: &[DeviceUser]) -> Self {
        Self::from_pairs(users.iter().map(|u| (u.user_id.clone(), u.name.clone())))
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            names: pairs.into_iter().collect(),
        }
    }

    /// Name for `user_id`, or `"User {user_id}"` when unknown or blank
    pub fn resolve(&self, user_id: &str) -> String {
        match self.names.get(user_id) {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => AttendanceEvent::placeholder_name(user_id),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Raw mapping, as reported to the operator (`userMap`)
    pub fn into_map(self) -> HashMap<String, String> {
        self.names
    }
}
