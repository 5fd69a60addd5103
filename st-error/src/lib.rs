//! Unified error handling for Studiotune
//!
//! This crate provides a single error type used across all Studiotune components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using StudiotuneError
pub type Result<T> = std::result::Result<T, StudiotuneError>;

/// Unified error type for all Studiotune operations
#[derive(thiserror::Error, Debug)]
pub enum StudiotuneError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Path Validation Errors
    // ============================================================================
    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        path: PathBuf,
        reason: String,
    },

    #[error("Path not in allowed directory: {0}")]
    PathNotAllowed(PathBuf),

    // ============================================================================
    // Tunable Access Errors
    // ============================================================================
    #[error("Failed to read tunable {path}: {reason}")]
    TunableRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write tunable {path}: {reason}")]
    TunableWrite {
        path: PathBuf,
        reason: String,
    },

    #[error("IRQ lookup failed: {0}")]
    IrqLookup(String),

    // ============================================================================
    // Process Control Errors
    // ============================================================================
    #[error("Failed to set CPU affinity for pid {pid}: {reason}")]
    AffinitySet {
        pid: i32,
        reason: String,
    },

    #[error("Failed to set scheduling policy for pid {pid}: {reason}")]
    SchedulerSet {
        pid: i32,
        reason: String,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // State and Ledger Errors
    // ============================================================================
    #[error("State persistence failed: {0}")]
    StatePersist(String),

    #[error("Ledger inconsistency: {0}")]
    Ledger(String),

    // ============================================================================
    // Audio Engine Errors
    // ============================================================================
    #[error("Audio engine query failed: {0}")]
    EngineQuery(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl StudiotuneError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a tunable write error
    pub fn tunable_write(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TunableWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a tunable read error
    pub fn tunable_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TunableRead {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// Allow converting from String to StudiotuneError
impl From<String> for StudiotuneError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to StudiotuneError
impl From<&str> for StudiotuneError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
