//! Initial shop data: barbers, their weekly hours and the service menu.
//!
//! ```json
//! {
//!   "barbers": [
//!     { "name": "Carlos", "hours": [{ "weekday": 1, "start": "08:00", "end": "18:00" }] }
//!   ],
//!   "services": [{ "name": "Corte Masculino", "duration_minutes": 30, "price_cents": 3500 }]
//! }
//! ```

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::engine::{Engine, EngineError, validate_resource_name, validate_service};
use crate::limits::{MAX_RESOURCES, MAX_SERVICES};
use crate::model::{ServiceSpec, Weekday, WorkingWindow};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedFile {
    #[serde(default)]
    pub barbers: Vec<SeedBarber>,
    #[serde(default)]
    pub services: Vec<SeedService>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedBarber {
    pub name: String,
    #[serde(default)]
    pub hours: Vec<SeedHours>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedHours {
    pub weekday: Weekday,
    pub start: ClockTime,
    pub end: ClockTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedService {
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: u64,
}

impl SeedService {
    fn to_spec(&self, id: Ulid) -> ServiceSpec {
        ServiceSpec {
            id,
            name: self.name.clone(),
            duration_minutes: self.duration_minutes,
            price_cents: self.price_cents,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub barbers: usize,
    pub windows: usize,
    pub services: usize,
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// Entry `index` of the named section is invalid.
    Invalid {
        section: &'static str,
        index: usize,
        source: EngineError,
    },
    Engine(EngineError),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "cannot read seed file: {e}"),
            SeedError::Parse(e) => write!(f, "malformed seed file: {e}"),
            SeedError::Invalid {
                section,
                index,
                source,
            } => write!(f, "{section}[{index}]: {source}"),
            SeedError::Engine(e) => write!(f, "seeding failed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedError::Io(e) => Some(e),
            SeedError::Parse(e) => Some(e),
            SeedError::Invalid { source, .. } => Some(source),
            SeedError::Engine(e) => Some(e),
        }
    }
}

impl From<EngineError> for SeedError {
    fn from(e: EngineError) -> Self {
        SeedError::Engine(e)
    }
}

impl SeedFile {
    pub fn parse(json: &str) -> Result<Self, SeedError> {
        let file: SeedFile = serde_json::from_str(json).map_err(SeedError::Parse)?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let json = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        Self::parse(&json)
    }

    /// Run every check the engine applies on insert, so a seed that passes
    /// here can't stop halfway through `apply_if_empty`.
    fn validate(&self) -> Result<(), SeedError> {
        if self.barbers.len() > MAX_RESOURCES {
            return Err(SeedError::Invalid {
                section: "barbers",
                index: MAX_RESOURCES,
                source: EngineError::LimitExceeded("too many resources"),
            });
        }
        for (index, barber) in self.barbers.iter().enumerate() {
            let invalid = |source| SeedError::Invalid {
                section: "barbers",
                index,
                source,
            };
            validate_resource_name(&barber.name).map_err(invalid)?;
            let mut seen = [false; 7];
            for hours in &barber.hours {
                WorkingWindow::new(Ulid::nil(), hours.weekday, hours.start, hours.end)
                    .map_err(invalid)?;
                if std::mem::replace(&mut seen[hours.weekday as usize], true) {
                    return Err(invalid(EngineError::InvalidWindow("weekday listed twice")));
                }
            }
        }

        if self.services.len() > MAX_SERVICES {
            return Err(SeedError::Invalid {
                section: "services",
                index: MAX_SERVICES,
                source: EngineError::LimitExceeded("too many services"),
            });
        }
        for (index, service) in self.services.iter().enumerate() {
            validate_service(&service.to_spec(Ulid::nil())).map_err(|source| SeedError::Invalid {
                section: "services",
                index,
                source,
            })?;
        }
        Ok(())
    }

    /// Load into `engine` unless it already holds data. `Ok(None)` when
    /// skipped.
    pub async fn apply_if_empty(&self, engine: &Engine) -> Result<Option<SeedSummary>, SeedError> {
        if !engine.is_empty() {
            return Ok(None);
        }
        self.validate()?;

        let mut summary = SeedSummary {
            barbers: 0,
            windows: 0,
            services: 0,
        };
        for service in &self.services {
            engine.upsert_service(service.to_spec(Ulid::new())).await?;
            summary.services += 1;
        }
        for barber in &self.barbers {
            let id = Ulid::new();
            engine.create_resource(id, barber.name.clone()).await?;
            summary.barbers += 1;
            for hours in &barber.hours {
                let window = WorkingWindow::new(id, hours.weekday, hours.start, hours.end)?;
                engine.set_working_window(window).await?;
                summary.windows += 1;
            }
        }

        info!(
            "seeded {} barbers, {} working windows, {} services",
            summary.barbers, summary.windows, summary.services
        );
        Ok(Some(summary))
    }
}
