pub mod client;
pub mod diff;
pub mod model;

pub use client::{PolicyClient, ResponseBody, DEFAULT_API_URL};
pub use diff::{assert_no_diff, diff, diff_with, Change, DiffOptions, StructuralDiff};
pub use model::{
    Inventory, InventoryAuth, InventoryDevice, InventoryNamespace, InventorySource, Policy,
    PolicyData, PolicySpec, SourceHost,
};
