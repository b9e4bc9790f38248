// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Standard variable table.
//!
//! Fixed, ordered mapping from slot index to the persistence name a monitored
//! value is stored under.

use serde::Serialize;

use crate::error::{ConfigurationError, OpcUaResult};

/// A named persistence slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StandardVariable {
    /// Slot index.
    #[serde(rename = "id")]
    pub slot: usize,

    /// Persistence name.
    pub name: &'static str,
}

/// The table, in slot order.
pub const STANDARD_VARIABLES: [StandardVariable; 4] = [
    StandardVariable { slot: 0, name: "temp1" },
    StandardVariable { slot: 1, name: "temp2" },
    StandardVariable { slot: 2, name: "flow1" },
    StandardVariable { slot: 3, name: "flow2" },
];

/// Returns the whole table.
#[inline]
pub fn all() -> &'static [StandardVariable] {
    &STANDARD_VARIABLES
}

/// Looks up a slot.
#[inline]
pub fn get(slot: usize) -> Option<StandardVariable> {
    STANDARD_VARIABLES.get(slot).copied()
}

/// Looks up a slot, failing with a caller error when out of range.
pub fn lookup(slot: usize) -> OpcUaResult<StandardVariable> {
    get(slot).ok_or_else(|| ConfigurationError::invalid_slot(slot, STANDARD_VARIABLES.len()).into())
}

/// Finds the slot for a persistence name.
pub fn by_name(name: &str) -> Option<StandardVariable> {
    STANDARD_VARIABLES.iter().find(|v| v.name == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        let names: Vec<_> = all().iter().map(|v| v.name).collect();
        assert_eq!(names, ["temp1", "temp2", "flow1", "flow2"]);
        for (index, var) in all().iter().enumerate() {
            assert_eq!(var.slot, index);
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(0).unwrap().name, "temp1");
        assert_eq!(lookup(3).unwrap().name, "flow2");
        assert_eq!(by_name("flow1").map(|v| v.slot), Some(2));

        let error = lookup(4).unwrap_err();
        assert_eq!(error.category(), "configuration");
        assert!(get(99).is_none());
    }

    #[test]
    fn test_serializes_with_id() {
        let json = serde_json::to_value(lookup(1).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1, "name": "temp2"}));
    }
}
