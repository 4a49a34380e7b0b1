use serde::Serialize;

/// How a compared column is judged.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Text,
    /// Never compared automatically; every row is flagged for manual review.
    Binary,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ValueKind,
}

const fn column(name: &'static str, kind: ValueKind) -> ColumnSpec {
    ColumnSpec { name, kind }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    /// Rows of both databases are read in this order before the lockstep walk.
    pub order_by: &'static [&'static str],
}

impl TableSpec {
    #[must_use]
    pub fn select_all_sql(&self) -> String {
        if self.order_by.is_empty() {
            format!("SELECT * FROM {}", self.name)
        } else {
            format!("SELECT * FROM {} ORDER BY {}", self.name, self.order_by.join(", "))
        }
    }
}

/// Column reported next to every finding so rows can be matched up by hand.
pub const CORRELATION_COLUMN: &str = "CollectionTimestamp";

pub const OBSERVATION_TABLE: TableSpec = TableSpec {
    name: "Observation",
    columns: &[
        column("ObservationId", ValueKind::Integer),
        column("DataPointId", ValueKind::Text),
        column("CollectionTimestamp", ValueKind::Text),
        column("ObservationHash", ValueKind::Binary),
    ],
    order_by: &["ObservationId"],
};

pub const OBSERVATION_ATTRIBUTE_TABLE: TableSpec = TableSpec {
    name: "ObservationAttribute",
    columns: &[
        column("ObservationId", ValueKind::Integer),
        column("DataPointId", ValueKind::Text),
        column("CollectionTimestamp", ValueKind::Text),
        column("AttributeId", ValueKind::Integer),
        column("AttributeValue", ValueKind::Text),
    ],
    order_by: &["ObservationId", "AttributeId"],
};

pub const OBSERVATION_ARCHIVE_TABLE: TableSpec = TableSpec {
    name: "ObservationArchive",
    columns: &[
        column("ObservationId", ValueKind::Integer),
        column("DataPointId", ValueKind::Text),
        column("CollectionTimestamp", ValueKind::Text),
        column("StartLine", ValueKind::Integer),
        column("EndLine", ValueKind::Integer),
    ],
    order_by: &["ObservationId", "StartLine"],
};

/// Tables compared by the dual-database diff, in report order.
pub const COMPARISON_SPEC: [TableSpec; 3] =
    [OBSERVATION_TABLE, OBSERVATION_ATTRIBUTE_TABLE, OBSERVATION_ARCHIVE_TABLE];
