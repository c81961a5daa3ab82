use serde::{Deserialize, Serialize};

pub const QUEUE_HIGH: &str = "csv_import_high";
pub const QUEUE_NORMAL: &str = "csv_import_normal";
pub const QUEUE_LARGE: &str = "csv_import_large";

/// Broker priority band of an import task. Each band is served by its own
/// durable queue; the integer priority only orders messages within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Large,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Large];

    pub fn queue_name(self) -> &'static str {
        match self {
            Priority::High => QUEUE_HIGH,
            Priority::Normal => QUEUE_NORMAL,
            Priority::Large => QUEUE_LARGE,
        }
    }

    pub fn amqp_priority(self) -> u8 {
        match self {
            Priority::High => 10,
            Priority::Normal => 5,
            Priority::Large => 1,
        }
    }

    pub fn for_queue(queue: &str) -> Option<Priority> {
        Priority::ALL.iter().copied().find(|p| p.queue_name() == queue)
    }
}

/// Body of a broker message: one uploaded CSV file waiting to be imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportTask {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub priority: Priority,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_published_body() {
        let body = r#"{
            "file_path": "/var/www/html/storage/csv/companies.csv",
            "file_name": "companies.csv",
            "file_size": 10240,
            "priority": "high",
            "created_at": "2024-03-01T10:00:00"
        }"#;
        let task: ImportTask = serde_json::from_str(body).unwrap();
        assert_eq!(task.file_name, "companies.csv");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.file_size, 10240);
    }

    #[test]
    fn rejects_garbage_body() {
        assert!(serde_json::from_str::<ImportTask>("not json").is_err());
    }

    #[test]
    fn queue_and_priority_mapping() {
        assert_eq!(Priority::High.amqp_priority(), 10);
        assert_eq!(Priority::Normal.amqp_priority(), 5);
        assert_eq!(Priority::Large.amqp_priority(), 1);
        assert_eq!(Priority::for_queue("csv_import_large"), Some(Priority::Large));
        assert_eq!(Priority::for_queue("csv_import_normal"), Some(Priority::Normal));
        assert_eq!(Priority::for_queue("unknown"), None);
    }

    #[test]
    fn priority_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::Large).unwrap(), r#""large""#);
    }
}
