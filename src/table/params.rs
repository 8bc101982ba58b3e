//! Parameters of one analytics table update

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::partition::AnalyticsTableType;

/// Earliest year a `last_years` limit resolves to
const EARLIEST_FROM_YEAR: i32 = 1;

/// Parameters for an analytics table update
///
/// `start_time` is the cutoff of the build: records written at or after it
/// are deferred to the next build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTableUpdateParams {
    /// Incremental ("latest data") update instead of a full rebuild
    pub latest_update: bool,
    /// Lower bound for the data included in a full rebuild
    pub from_date: Option<NaiveDate>,
    /// Build cutoff, truncated to whole seconds
    pub start_time: DateTime<Utc>,
    /// Table types excluded from this update
    #[serde(default)]
    pub skip_table_types: BTreeSet<AnalyticsTableType>,
}

impl AnalyticsTableUpdateParams {
    pub fn builder() -> AnalyticsTableUpdateParamsBuilder {
        AnalyticsTableUpdateParamsBuilder::default()
    }

    pub fn is_latest_update(&self) -> bool {
        self.latest_update
    }

    pub fn is_skip_table_type(&self, table_type: AnalyticsTableType) -> bool {
        self.skip_table_types.contains(&table_type)
    }
}

/// Builder for [`AnalyticsTableUpdateParams`]
#[derive(Debug, Default)]
pub struct AnalyticsTableUpdateParamsBuilder {
    latest_update: bool,
    from_date: Option<NaiveDate>,
    last_years: Option<u32>,
    start_time: Option<DateTime<Utc>>,
    skip_table_types: BTreeSet<AnalyticsTableType>,
}

impl AnalyticsTableUpdateParamsBuilder {
    pub fn latest_update(mut self, latest_update: bool) -> Self {
        self.latest_update = latest_update;
        self
    }

    pub fn from_date(mut self, from_date: NaiveDate) -> Self {
        self.from_date = Some(from_date);
        self
    }

    /// Only rebuild the given number of most recent years, the current one included
    ///
    /// Zero means no limit. A count reaching past year 1 covers all years
    /// but still builds as a limited rebuild.
    pub fn last_years(mut self, last_years: u32) -> Self {
        self.last_years = Some(last_years);
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn skip_table_type(mut self, table_type: AnalyticsTableType) -> Self {
        self.skip_table_types.insert(table_type);
        self
    }

    pub fn build(self) -> AnalyticsTableUpdateParams {
        let start_time = self.start_time.unwrap_or_else(Utc::now).trunc_subsecs(0);

        let from_date = self
            .from_date
            .or_else(|| self.last_years.and_then(|n| first_day_of_last_years(&start_time, n)));

        AnalyticsTableUpdateParams {
            latest_update: self.latest_update,
            from_date,
            start_time,
            skip_table_types: self.skip_table_types,
        }
    }
}

/// January 1st of the first of the `last_years` years ending with the
/// year of `start_time`
fn first_day_of_last_years(start_time: &DateTime<Utc>, last_years: u32) -> Option<NaiveDate> {
    if last_years == 0 {
        return None;
    }

    let year = i32::try_from(last_years)
        .ok()
        .and_then(|n| start_time.year().checked_sub(n))
        .and_then(|year| year.checked_add(1))
        .map_or(EARLIEST_FROM_YEAR, |year| year.max(EARLIEST_FROM_YEAR));

    NaiveDate::from_ymd_opt(year, 1, 1)
}
