mod settings;

pub use settings::{
    AlertSettings, IngestSettings, PostgresSettings, ProviderSettings, RetentionSettings,
    ScheduleSettings, Settings,
};
