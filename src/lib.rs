pub mod traits;
pub mod domain;
pub mod cache;
pub mod ui;
pub mod state;
pub mod events;
pub mod config;
pub mod settings;
pub mod grid;
pub mod virtual_source;

// Export host-facing traits
pub use traits::{
    ItemSource, FnSource,
    RowPresenter, RowBinding, RowMetrics, FixedHeightPresenter
};

// Export the node model
pub use domain::{
    NodeTree, NodeId, NodeKind, TreeNode, NodeRef,
    FlatIndex, ItemsChange, ExpansionSnapshot
};

// Export row caching and layout
pub use cache::{RowCache, Row, RowState, CacheStats};
pub use ui::{
    ViewportLayoutEngine, LayoutMode, InvalidationKind, LayoutOutcome, Placement,
    Navigation
};

// Export selection and events
pub use state::{SelectionModel, SelectMode};
pub use events::{GridEvent, EventQueue};

// Export the grid facade
pub use grid::{TreeGrid, VisibleRow};

// Export configuration and persistence
pub use config::GridConfig;
pub use settings::{Storage, JsonFileStorage, SettingsCoordinator};

// Export synthetic source
pub use virtual_source::{VirtualSource, VirtualItem};
