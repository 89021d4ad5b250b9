use serde::{
  Deserialize,
  Serialize
};

/// Error shape produced by the backend
/// command handlers. A failing command
/// answers with this value in place of
/// its data.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(tag = "type", content = "data")]
pub enum AppError {
  Db(String),
  NotFound,
  Regex(String),
  Other(String)
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct WeekRangeArgs {
  pub week_start: i64,
  pub week_end:   i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TimeBlockApp {
  pub app:            String,
  pub total_duration: i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct TimeBlockDto {
  pub id:         i64,
  pub category:   String,
  pub start_time: i64,
  pub end_time:   i64,
  #[serde(default)]
  pub apps:       Vec<TimeBlockApp>
}

/// One app's logs inside a time block,
/// merged by the backend.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct EventLogDto {
  pub ids:       Vec<i64>,
  pub app:       String,
  pub timestamp: i64,
  pub duration:  i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct LogsForTimeBlockArgs {
  pub app_names:  Vec<String>,
  pub start_time: i64,
  pub end_time:   i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct LogIdsArg {
  pub ids: Vec<i64>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct SkippedAppDto {
  pub id:    i64,
  pub regex: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct NewSkippedApp {
  pub regex: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct NewSkippedAppArgs {
  pub new_app: NewSkippedApp
}

#[derive(
  Debug, Clone, Serialize, Deserialize,
)]
pub struct CountMatchingLogsArgs {
  pub regex: String
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct CategoryDto {
  pub id:       i64,
  pub name:     String,
  pub priority: i64,
  pub color:    Option<String>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct DeleteCategoryArgs {
  pub id:      i64,
  /// Also drop the category's regexes.
  pub cascade: bool
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct IdArg {
  pub id: i64
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct UpdateSkippedAppArgs {
  pub app: SkippedAppDto
}
