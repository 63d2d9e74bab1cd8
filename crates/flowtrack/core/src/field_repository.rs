// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Per-(object, field) provenance side-table

use crate::context;
use crate::point::TrackerPoint;
use crate::weak_map::WeakIdentityMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Arc<FieldRepository>> = OnceLock::new();

/// Remembers where the value stored in a field of an object came from
#[derive(Default)]
pub struct FieldRepository {
    points: WeakIdentityMap<HashMap<String, TrackerPoint>>,
}

impl FieldRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<FieldRepository> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Key of a field in the side-table
    pub fn field_id(owner: &str, name: &str) -> String {
        format!("{owner} {name}")
    }

    pub fn get_point<T: Any + Send + Sync>(&self, object: &Arc<T>, field_id: &str) -> Option<TrackerPoint> {
        if !context::is_active() {
            return None;
        }
        self.points.get(object)?.get(field_id).cloned()
    }

    /// Records the provenance of the value just stored in `field_id`; None forgets it
    pub fn set_point<T: Any + Send + Sync>(&self, object: &Arc<T>, field_id: &str, point: Option<TrackerPoint>) {
        if !context::is_active() {
            return;
        }
        match point {
            Some(point) => self.points.update(object, HashMap::new, |fields| {
                fields.insert(field_id.to_string(), point);
            }),
            None => {
                if self.points.get(object).is_some() {
                    self.points.update(object, HashMap::new, |fields| {
                        fields.remove(field_id);
                    });
                }
            }
        }
    }

    pub fn purge(&self) -> usize {
        self.points.purge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Tracker;

    #[test]
    fn test_points_are_per_object_and_field() {
        let repository = FieldRepository::new();
        let origin = Tracker::origin();
        let first = Arc::new(());
        let second = Arc::new(());
        let field = FieldRepository::field_id("demo/Holder", "c");
        let point = TrackerPoint::new(origin, 2, 1);

        repository.set_point(&first, &field, Some(point.clone()));
        assert_eq!(repository.get_point(&first, &field), Some(point));
        assert_eq!(repository.get_point(&second, &field), None);
        assert_eq!(repository.get_point(&first, "demo/Holder b"), None);

        repository.set_point(&first, &field, None);
        assert_eq!(repository.get_point(&first, &field), None);
    }

    #[test]
    fn test_field_id_format() {
        assert_eq!(FieldRepository::field_id("java/lang/String", "value"), "java/lang/String value");
    }
}
