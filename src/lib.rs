//! characanvas: the layered canvas engine behind the anime-character drawing
//! studio.
//!
//! The crate is headless. It owns the layer stack, brush catalog, stroke
//! renderer, compositor, undo history, version snapshots and the project
//! serialization format; display surfaces and the remote AI transport are
//! injected by whatever embeds it (the studio front end, the CLI binary, or
//! tests).

pub mod canvas;
pub mod cli;
pub mod history;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;
pub mod stroke;
pub mod tools;
pub mod version;

pub use canvas::{BlendMode, CanvasError, CanvasState, Layer, LayerId, LayerPatch, TiledImage};
pub use history::{BrushCommand, Command, HistoryManager, LayerOpCommand, LayerOperation};
pub use project::{CharacterMetadata, DecodedProject, Project, ProjectError, SCHEMA_VERSION};
pub use settings::{AppContext, AppSettings, FileSettingsRepository, SettingsRepository};
pub use stroke::{MoveOutcome, PointerInput, StrokeEnd, StrokeEngine};
pub use tools::{config_for, lookup, BrushSettings, PenConfiguration, Tool, ToolCategory};
pub use version::{VersionError, VersionSnapshot, VersionStore};
