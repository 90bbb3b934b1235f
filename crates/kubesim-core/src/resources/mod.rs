pub mod quantities;

pub use quantities::{format_quantity, parse_quantity, MILLI};

use crate::error::{CoreError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Well-known resource names
pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_PODS: &str = "pods";

/// A mapping from resource name to quantity, stored in milli-units.
///
/// A missing key means zero in every comparison and in arithmetic, so two
/// vectors that only differ by explicit zero entries compare equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Quantity>",
    into = "BTreeMap<String, Quantity>"
)]
pub struct ResourceVector(BTreeMap<String, i64>);

impl ResourceVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Kubernetes resource list (e.g. a container's requests)
    pub fn from_quantities(resources: &BTreeMap<String, Quantity>) -> Result<Self> {
        let mut vector = Self::new();
        for (name, quantity) in resources {
            vector.set(name.clone(), parse_quantity(&quantity.0)?);
        }
        Ok(vector)
    }

    /// Convert back into a Kubernetes resource list
    pub fn to_quantities(&self) -> BTreeMap<String, Quantity> {
        self.0
            .iter()
            .map(|(name, milli)| (name.clone(), Quantity(format_quantity(*milli))))
            .collect()
    }

    /// Builder-style insert of a whole-unit quantity
    pub fn with(mut self, name: impl Into<String>, units: i64) -> Self {
        self.set(name, units * MILLI);
        self
    }

    /// Set a value in milli-units
    pub fn set(&mut self, name: impl Into<String>, milli: i64) {
        self.0.insert(name.into(), milli);
    }

    /// Value in milli-units, zero when absent
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// True when the resource is listed, even with a zero value
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(name, milli)| (name.as_str(), *milli))
    }

    /// True when every component is zero
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    /// True when `self >= other` for every resource in either vector
    pub fn dominates(&self, other: &ResourceVector) -> bool {
        self.0
            .keys()
            .chain(other.0.keys())
            .all(|name| self.get(name) >= other.get(name))
    }

    /// Resources where `other` exceeds `self`, as (name, mine, theirs)
    pub fn shortfalls<'a>(&'a self, other: &'a ResourceVector) -> Vec<(&'a str, i64, i64)> {
        let mut names: Vec<&str> = self.names().chain(other.names()).collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter(|name| other.get(name) > self.get(name))
            .map(|name| (name, self.get(name), other.get(name)))
            .collect()
    }
}

impl PartialEq for ResourceVector {
    fn eq(&self, other: &Self) -> bool {
        self.dominates(other) && other.dominates(self)
    }
}

impl Eq for ResourceVector {}

impl AddAssign<&ResourceVector> for ResourceVector {
    fn add_assign(&mut self, rhs: &ResourceVector) {
        for (name, milli) in &rhs.0 {
            *self.0.entry(name.clone()).or_insert(0) += milli;
        }
    }
}

impl SubAssign<&ResourceVector> for ResourceVector {
    fn sub_assign(&mut self, rhs: &ResourceVector) {
        for (name, milli) in &rhs.0 {
            *self.0.entry(name.clone()).or_insert(0) -= milli;
        }
    }
}

impl Add<&ResourceVector> for &ResourceVector {
    type Output = ResourceVector;

    fn add(self, rhs: &ResourceVector) -> ResourceVector {
        let mut sum = self.clone();
        sum += rhs;
        sum
    }
}

impl Sub<&ResourceVector> for &ResourceVector {
    type Output = ResourceVector;

    fn sub(self, rhs: &ResourceVector) -> ResourceVector {
        let mut diff = self.clone();
        diff -= rhs;
        diff
    }
}

impl<'a> std::iter::Sum<&'a ResourceVector> for ResourceVector {
    fn sum<I: Iterator<Item = &'a ResourceVector>>(iter: I) -> Self {
        let mut total = ResourceVector::new();
        for v in iter {
            total += v;
        }
        total
    }
}

impl std::iter::Sum for ResourceVector {
    fn sum<I: Iterator<Item = ResourceVector>>(iter: I) -> Self {
        let mut total = ResourceVector::new();
        for v in iter {
            total += &v;
        }
        total
    }
}

impl TryFrom<BTreeMap<String, Quantity>> for ResourceVector {
    type Error = CoreError;

    fn try_from(resources: BTreeMap<String, Quantity>) -> Result<Self> {
        Self::from_quantities(&resources)
    }
}

impl From<ResourceVector> for BTreeMap<String, Quantity> {
    fn from(vector: ResourceVector) -> Self {
        vector.to_quantities()
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(name, milli)| format!("{}={}", name, format_quantity(*milli)))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
