//! Interactive labeling session: tile/date navigation over the catalog,
//! one displayed mosaic at a time, and the per-class label store.

use crate::core::labels::{ClassLegend, LabelStore};
use crate::core::mosaic::{MissionSelector, Mosaic, Mosaicker};
use crate::core::tiles::TileCatalog;
use crate::io::archive::ImageArchive;
use crate::io::export::ExportJob;
use crate::types::{parse_mission_date, MosaicKey, PlumbError, PlumbResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What happens when navigation steps past either end of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationPolicy {
    /// Fail with `TileIndexOutOfRange` and leave the session unchanged
    Error,
    /// Stay on the first / last tile
    Clamp,
    /// Continue from the other end
    Wrap,
}

/// Labeling session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub navigation: NavigationPolicy,
    /// Labeler initials stamped on export file names
    pub initials: String,
    /// Built-in legend version the session labels against
    pub legend_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            navigation: NavigationPolicy::Error,
            initials: "XXX".to_string(),
            legend_version: "eeplumb-v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TileSelected { tile_id: u32 },
    MosaicDisplayed { key: MosaicKey },
    /// Re-enterable; the label store survives every export.
    /// `last_key` is the mosaic still on screen, `export_key` names the files.
    Exported {
        exports: usize,
        last_key: Option<MosaicKey>,
        export_key: MosaicKey,
    },
}

/// Result of a display cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayOutcome {
    Displayed,
    /// Imagery exists but every pixel is masked
    FullyMasked,
    /// No scene matched the key
    NoImagery,
}

/// Map surface the session draws on
pub trait MapDisplay {
    /// Remove the currently shown mosaic layer
    fn clear(&mut self);
    fn show(&mut self, mosaic: &Mosaic);
    /// User-facing status message
    fn notify(&mut self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Clear,
    Show(MosaicKey),
    Notify(String),
}

/// Display that records every call, for tests and headless runs
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub events: Vec<DisplayEvent>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers currently on the map (shows since the last clear)
    pub fn visible(&self) -> Vec<&MosaicKey> {
        let start = self
            .events
            .iter()
            .rposition(|e| *e == DisplayEvent::Clear)
            .map_or(0, |i| i + 1);
        self.events[start..]
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Show(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Notify(m) => Some(m.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl MapDisplay for RecordingDisplay {
    fn clear(&mut self) {
        self.events.push(DisplayEvent::Clear);
    }

    fn show(&mut self, mosaic: &Mosaic) {
        self.events.push(DisplayEvent::Show(mosaic.key.clone()));
    }

    fn notify(&mut self, message: &str) {
        self.events.push(DisplayEvent::Notify(message.to_string()));
    }
}

/// Labeling session state machine
pub struct LabelingSession<'a, D: MapDisplay> {
    archive: &'a dyn ImageArchive,
    catalog: &'a TileCatalog,
    mosaicker: Mosaicker,
    display: D,
    store: LabelStore,
    config: SessionConfig,
    state: SessionState,
    selection: Option<(MissionSelector, NaiveDate)>,
    tile_index: Option<usize>,
    current: Option<Mosaic>,
    exports: usize,
}

impl<'a, D: MapDisplay> LabelingSession<'a, D> {
    /// Create new session labeling against `legend`
    pub fn new(
        archive: &'a dyn ImageArchive,
        catalog: &'a TileCatalog,
        mosaicker: Mosaicker,
        display: D,
        legend: ClassLegend,
        config: SessionConfig,
    ) -> Self {
        Self {
            archive,
            catalog,
            mosaicker,
            display,
            store: LabelStore::new(legend),
            config,
            state: SessionState::Idle,
            selection: None,
            tile_index: None,
            current: None,
            exports: 0,
        }
    }

    /// Session using the configured built-in legend
    pub fn with_config(
        archive: &'a dyn ImageArchive,
        catalog: &'a TileCatalog,
        mosaicker: Mosaicker,
        display: D,
        config: SessionConfig,
    ) -> PlumbResult<Self> {
        let legend = ClassLegend::builtin(&config.legend_version)?;
        Ok(Self::new(archive, catalog, mosaicker, display, legend, config))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn store(&self) -> &LabelStore {
        &self.store
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn current_mosaic(&self) -> Option<&Mosaic> {
        self.current.as_ref()
    }

    pub fn current_tile(&self) -> Option<u32> {
        self.tile_index.and_then(|i| self.catalog.id_at(i))
    }

    /// Select a tile by id; redisplays when a mission-date is chosen
    pub fn select_tile(&mut self, tile_id: u32) -> PlumbResult<Option<DisplayOutcome>> {
        self.catalog.get(tile_id)?;
        let index = self
            .catalog
            .position_of(tile_id)
            .ok_or(PlumbError::TileNotFound(tile_id))?;
        self.move_to(index)
    }

    /// Choose the mission-date and display it on the current tile
    /// (the first tile when none is selected)
    pub fn jump_to(&mut self, selector: MissionSelector, date: NaiveDate) -> PlumbResult<DisplayOutcome> {
        let index = match self.tile_index {
            Some(i) => i,
            None => {
                if self.catalog.is_empty() {
                    return Err(PlumbError::TileIndexOutOfRange { index: 0, len: 0 });
                }
                0
            }
        };
        self.selection = Some((selector, date));
        self.tile_index = Some(index);
        self.refresh()
    }

    /// Jump using a typed key such as "LS8 2022-05-05"
    pub fn jump_to_key(&mut self, key: &str) -> PlumbResult<DisplayOutcome> {
        let (mission, date) = parse_mission_date(key)?;
        self.jump_to(MissionSelector::Mission(mission), date)
    }

    pub fn next_tile(&mut self) -> PlumbResult<Option<DisplayOutcome>> {
        self.step(1)
    }

    pub fn prev_tile(&mut self) -> PlumbResult<Option<DisplayOutcome>> {
        self.step(-1)
    }

    fn step(&mut self, delta: i64) -> PlumbResult<Option<DisplayOutcome>> {
        let current = self
            .tile_index
            .ok_or_else(|| PlumbError::InvalidState("No tile selected".to_string()))?;
        let len = self.catalog.len();
        let target = current as i64 + delta;

        let index = if (0..len as i64).contains(&target) {
            target as usize
        } else {
            match self.config.navigation {
                NavigationPolicy::Error => {
                    return Err(PlumbError::TileIndexOutOfRange { index: target, len });
                }
                NavigationPolicy::Clamp => target.clamp(0, len as i64 - 1) as usize,
                NavigationPolicy::Wrap => target.rem_euclid(len as i64) as usize,
            }
        };
        log::debug!("Navigating from tile index {} to {}", current, index);
        self.move_to(index)
    }

    fn move_to(&mut self, index: usize) -> PlumbResult<Option<DisplayOutcome>> {
        let tile_id = self.catalog.id_at(index).ok_or(PlumbError::TileIndexOutOfRange {
            index: index as i64,
            len: self.catalog.len(),
        })?;
        self.tile_index = Some(index);
        if self.selection.is_some() {
            return self.refresh().map(Some);
        }
        self.state = SessionState::TileSelected { tile_id };
        Ok(None)
    }

    /// Clear the map, then mosaic and show the current key
    fn refresh(&mut self) -> PlumbResult<DisplayOutcome> {
        let (selector, date) = self
            .selection
            .clone()
            .ok_or_else(|| PlumbError::InvalidState("No mission-date selected".to_string()))?;
        let index = self
            .tile_index
            .ok_or_else(|| PlumbError::InvalidState("No tile selected".to_string()))?;
        let tile_id = self.catalog.id_at(index).ok_or(PlumbError::TileIndexOutOfRange {
            index: index as i64,
            len: self.catalog.len(),
        })?;
        let catalog = self.catalog;
        let tile = catalog.get(tile_id)?;

        self.display.clear();
        self.current = None;
        self.state = SessionState::TileSelected { tile_id };

        match self.mosaicker.select_and_mosaic(self.archive, &selector, date, tile) {
            Ok(mosaic) => {
                let outcome = if mosaic.is_fully_masked() {
                    self.display
                        .notify(&format!("imagery for {} is fully masked", mosaic.key));
                    DisplayOutcome::FullyMasked
                } else {
                    DisplayOutcome::Displayed
                };
                self.display.show(&mosaic);
                self.state = SessionState::MosaicDisplayed {
                    key: mosaic.key.clone(),
                };
                self.current = Some(mosaic);
                Ok(outcome)
            }
            Err(PlumbError::NoMatchingScene { key }) => {
                log::info!("No imagery for {}", key);
                self.display.notify(&format!("no imagery for {}", key));
                Ok(DisplayOutcome::NoImagery)
            }
            Err(e) => Err(e),
        }
    }

    /// Key of the mosaic currently on screen
    fn on_screen(&self) -> Option<&MosaicKey> {
        match &self.state {
            SessionState::MosaicDisplayed { key } => Some(key),
            SessionState::Exported { last_key, .. } => last_key.as_ref(),
            _ => None,
        }
    }

    /// Record a labeled point against the mosaic on screen
    pub fn add_label(&mut self, class: &str, lon: f64, lat: f64) -> PlumbResult<()> {
        let key = self
            .on_screen()
            .cloned()
            .ok_or_else(|| PlumbError::InvalidState("No mosaic displayed to label".to_string()))?;
        self.store.add(class, lon, lat, key)
    }

    /// Snapshot the store into an export job. The store is kept, so later
    /// exports carry the same rows plus any newer points.
    pub fn export(&mut self, export_date: NaiveDate) -> PlumbResult<ExportJob> {
        let key = match (&self.state, &self.current) {
            (_, Some(mosaic)) => mosaic.key.clone(),
            (SessionState::TileSelected { tile_id }, None) => {
                let (selector, date) = self.selection.clone().ok_or_else(|| {
                    PlumbError::InvalidState("Nothing has been displayed yet".to_string())
                })?;
                MosaicKey::new(selector.label(), date, *tile_id)
            }
            (SessionState::Exported { export_key, .. }, None) => export_key.clone(),
            _ => return Err(PlumbError::InvalidState("Nothing has been displayed yet".to_string())),
        };

        let table = self.store.snapshot()?;
        let job = ExportJob::labels(&self.config.initials, &key, table, export_date)?;
        self.exports += 1;
        log::info!("Export #{} prepared: {} ({} rows)", self.exports, job.name, self.store.len());
        self.state = SessionState::Exported {
            exports: self.exports,
            last_key: self.current.as_ref().map(|m| m.key.clone()),
            export_key: key,
        };
        Ok(job)
    }
}
