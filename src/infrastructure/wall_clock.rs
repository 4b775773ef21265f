use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Timezone used to translate between the user's wall-clock times and UTC instants.
///
/// The offset is looked up at conversion time, so a value stored before a DST switch
/// and read back after it shifts by the difference. That is accepted behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WallClock {
    #[default]
    System,
    Named(Tz),
}

impl WallClock {
    pub fn from_config(timezone: Option<&str>) -> Result<Self, InfraError> {
        let Some(name) = timezone.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::System);
        };
        if name.eq_ignore_ascii_case("system") || name.eq_ignore_ascii_case("local") {
            return Ok(Self::System);
        }
        name.parse::<Tz>()
            .map(Self::Named)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{name}': {error}")))
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Self::System => resolve_local(&Local, local),
            Self::Named(zone) => resolve_local(zone, local),
        }
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::System => instant.with_timezone(&Local).naive_local(),
            Self::Named(zone) => instant.with_timezone(zone).naive_local(),
        }
    }
}

// Ambiguous times take the earlier instant; times inside a DST gap move forward an hour.
fn resolve_local<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(value) => value.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => zone
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}
