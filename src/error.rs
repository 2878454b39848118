// Error types
// User-facing signal errors (Turkish, shown as-is), sensor errors, and the
// store boundary. Store errors never cross the signal layer: the manager and
// reader absorb them and log the cause.

/// User-facing failure of a signal operation. The `Display` text is the
/// message shown to the user, unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Requested duration is not in the allow-list.
    #[error("Geçersiz süre. Lütfen 10, 30 veya 60 dakika seçin.")]
    InvalidDuration(u32),

    /// Accuracy must be a non-negative finite number of meters.
    #[error("Geçersiz konum doğruluğu değeri")]
    InvalidAccuracy(f64),

    /// The store rejected or failed the start write. Cause is in the logs.
    #[error("Sinyal başlatılırken hata oluştu")]
    StartFailed,

    /// The store rejected or failed the stop write. Cause is in the logs.
    #[error("Sinyal durdurulurken hata oluştu")]
    StopFailed,
}

/// Failure to obtain a position fix from a location source.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Konum izni reddedildi")]
    PermissionDenied,

    #[error("Konum bilgisi alınamadı")]
    Unavailable,

    #[error("Konum isteği zaman aşımına uğradı")]
    Timeout,

    #[error("Konum alınırken hata oluştu")]
    Other,
}

/// Error at the visibility-store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store cannot serve requests right now (used by the in-memory
    /// adapter's fault switch).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
