// src/core/types/mod.rs

use crate::core::common::ObjectId;
use crate::core::distance::IndexedObject;
use serde::{Deserialize, Serialize};

/// A dense feature vector with a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub id: ObjectId,
    pub values: Vec<f64>,
}

impl FeatureVector {
    #[must_use]
    pub const fn new(id: ObjectId, values: Vec<f64>) -> Self {
        Self { id, values }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

impl IndexedObject for FeatureVector {
    fn id(&self) -> ObjectId {
        self.id
    }
}
