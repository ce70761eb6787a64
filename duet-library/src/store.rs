//! SQLite store for per-track annotations
//!
//! Keeps cue points and beat grids for each track of a room so they survive
//! reloads and restarts.

use duet_audio::{
    AnnotationStore, CuePoints, GridSource, PersistError, StoredGrid, TrackAnnotations,
    TrackRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CacheError> for PersistError {
    fn from(err: CacheError) -> Self {
        PersistError::Backend(err.to_string())
    }
}

/// Annotation store backed by SQLite
pub struct AnnotationCache {
    conn: Connection,
}

impl AnnotationCache {
    /// SQL schema for the tracks table
    const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tracks (
            room TEXT NOT NULL,
            track_id TEXT NOT NULL,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            cue_start REAL,
            cue_end REAL,
            cue_a REAL,
            cue_b REAL,
            first_beat_time REAL,
            grid_bpm REAL,
            grid_source TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (room, track_id)
        );
        CREATE INDEX IF NOT EXISTS idx_room ON tracks(room);
    "#;

    /// Open or create a store database at the given path
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    /// Add a track to a room
    ///
    /// Tracks already in the room keep their annotations.
    pub fn register_track(&self, room: &str, track: &TrackRecord) -> Result<(), CacheError> {
        self.conn.execute(
            r#"INSERT OR IGNORE INTO tracks (room, track_id, title, artist, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![room, track.id, track.title, track.artist, now()],
        )?;
        Ok(())
    }

    /// Get the number of stored tracks across all rooms
    pub fn count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl AnnotationStore for AnnotationCache {
    fn load(&self, room: &str, track_id: &str) -> Result<Option<TrackAnnotations>, PersistError> {
        let row = self
            .conn
            .query_row(
                "SELECT cue_start, cue_end, cue_a, cue_b, first_beat_time, grid_bpm, grid_source
                 FROM tracks
                 WHERE room = ?1 AND track_id = ?2",
                params![room, track_id],
                |row| {
                    let cue_points = CuePoints {
                        start: row.get(0)?,
                        end: row.get(1)?,
                        a: row.get(2)?,
                        b: row.get(3)?,
                    };
                    let first_beat_time: Option<f64> = row.get(4)?;
                    let bpm: Option<f64> = row.get(5)?;
                    let source: Option<String> = row.get(6)?;
                    Ok((cue_points, first_beat_time, bpm, source))
                },
            )
            .optional()
            .map_err(CacheError::from)?;

        let Some((cue_points, first_beat_time, bpm, source)) = row else {
            return Ok(None);
        };

        let grid = source.and_then(|s| match GridSource::parse(&s) {
            Some(source) => Some(StoredGrid {
                first_beat_time,
                bpm,
                source,
            }),
            None => {
                warn!(track = track_id, source = %s, "unknown grid source");
                None
            }
        });

        Ok(Some(TrackAnnotations { cue_points, grid }))
    }

    fn save_cue_points(
        &mut self,
        room: &str,
        track_id: &str,
        cues: &CuePoints,
    ) -> Result<(), PersistError> {
        let affected = self.conn.execute(
            r#"UPDATE tracks
               SET cue_start = ?3, cue_end = ?4, cue_a = ?5, cue_b = ?6, updated_at = ?7
               WHERE room = ?1 AND track_id = ?2"#,
            params![room, track_id, cues.start, cues.end, cues.a, cues.b, now()],
        )
        .map_err(CacheError::from)?;
        if affected == 0 {
            return Err(PersistError::NotFound(track_id.to_string()));
        }
        Ok(())
    }

    fn save_beat_grid(
        &mut self,
        room: &str,
        track_id: &str,
        grid: &StoredGrid,
    ) -> Result<(), PersistError> {
        let affected = self.conn.execute(
            r#"UPDATE tracks
               SET first_beat_time = ?3, grid_bpm = ?4, grid_source = ?5, updated_at = ?6
               WHERE room = ?1 AND track_id = ?2"#,
            params![
                room,
                track_id,
                grid.first_beat_time,
                grid.bpm,
                grid.source.as_str(),
                now()
            ],
        )
        .map_err(CacheError::from)?;
        if affected == 0 {
            return Err(PersistError::NotFound(track_id.to_string()));
        }
        Ok(())
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
