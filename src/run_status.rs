use std::sync::{Arc, Mutex};

/// Shared progress of the run in flight, readable from any thread.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_symbols: usize,
    processed_symbols: usize,
    failed_symbols: usize,
    failed_partitions: usize,
    debug_notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_symbols: usize,
    pub processed_symbols: usize,
    pub failed_symbols: usize,
    pub failed_partitions: usize,
    pub debug_notes: Option<String>,
}

impl RunStatusSnapshot {
    pub fn fraction(&self) -> f64 {
        if self.total_symbols == 0 {
            0.0
        } else {
            self.processed_symbols as f64 / self.total_symbols as f64
        }
    }
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    /// Starts counting a new run over `total_symbols`.
    pub fn begin(&self, total_symbols: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_symbols = total_symbols;
            data.processed_symbols = 0;
            data.failed_symbols = 0;
            data.failed_partitions = 0;
        }
    }

    pub fn add_processed(&self, symbols: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.processed_symbols = (data.processed_symbols + symbols).min(data.total_symbols);
        }
    }

    pub fn set_failures(&self, failed_symbols: usize, failed_partitions: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.failed_symbols = failed_symbols;
            data.failed_partitions = failed_partitions;
        }
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_symbols: data.total_symbols,
                processed_symbols: data.processed_symbols,
                failed_symbols: data.failed_symbols,
                failed_partitions: data.failed_partitions,
                debug_notes: data.debug_notes.clone(),
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_symbols: 0,
                processed_symbols: 0,
                failed_symbols: 0,
                failed_partitions: 0,
                debug_notes: None,
            }
        }
    }

    pub fn set_debug_note<S: Into<String>>(&self, note: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.debug_notes = Some(note.into());
        }
    }

    pub fn clear_debug_note(&self) {
        if let Ok(mut data) = self.inner.lock() {
            data.debug_notes = None;
        }
    }
}
