//! Entity and graph model of an extracted Schedule of Activities

mod entity;
mod header;
mod timeline;

pub use entity::{
    cell_key, Activity, ActivityGroup, ActivityTimepoint, Code, Encounter, Epoch,
    PlannedTimepoint, ScheduleTimeline, ScheduledActivityInstance, TimingWindow,
};
pub use header::HeaderStructure;
pub use timeline::{
    ModelError, Study, StudyVersion, Timeline, TimelineDocument, SYSTEM_NAME, TIMELINE_POINTER,
    USDM_VERSION,
};
