#![allow(dead_code)]

use sql_crud_utils::prelude::*;

pub const SCHEMA: &str = "
    CREATE TABLE team (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE player (
        id INTEGER PRIMARY KEY,
        team_id INTEGER REFERENCES team(id),
        name TEXT NOT NULL UNIQUE,
        score INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        created_by TEXT,
        updated_by TEXT,
        deleted_at TEXT,
        deleted_by TEXT,
        is_deleted INTEGER NOT NULL DEFAULT 0
    );
";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub players: Vec<Player>,
}

impl Team {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Model for Team {
    const TABLE_NAME: &'static str = "team";
    const COLUMNS: &'static [Column] = &[Column::int("id"), Column::text("name")];
    const RELATIONSHIPS: &'static [Relationship] = &[Relationship {
        name: "players",
        target_table: "player",
        local_column: "id",
        remote_column: "team_id",
    }];

    fn to_values(&self) -> FieldMap {
        field_map([
            ("id", RowValues::from(self.id)),
            ("name", self.name.clone().into()),
        ])
    }

    fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
        Ok(Self {
            id: row.opt_int("id")?,
            name: row.opt_text("name")?.unwrap_or_default(),
            players: Vec::new(),
        })
    }

    fn set_field(&mut self, column: &str, value: RowValues) -> Result<(), CrudError> {
        match column {
            "id" => self.id = value.as_int().copied(),
            "name" => self.name = value.as_text().unwrap_or_default().to_string(),
            other => return Err(CrudError::validation(other, "unknown column")),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::field("name", "must not be empty"));
        }
        Ok(())
    }

    fn attach_related(&mut self, name: &str, rows: Vec<CustomDbRow>) -> Result<(), CrudError> {
        match name {
            "players" => {
                self.players = rows.iter().map(Player::from_row).collect::<Result<_, _>>()?;
                Ok(())
            }
            other => Err(CrudError::validation(other, "unknown relationship")),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Player {
    pub id: Option<i64>,
    pub team_id: Option<i64>,
    pub name: String,
    pub score: i64,
    pub audit: AuditFields,
    pub soft: SoftDeleteFields,
}

impl Player {
    pub fn new(name: &str, team_id: Option<i64>, score: i64) -> Self {
        Self {
            name: name.to_string(),
            team_id,
            score,
            ..Self::default()
        }
    }
}

impl Model for Player {
    const TABLE_NAME: &'static str = "player";
    const COLUMNS: &'static [Column] = &[
        Column::int("id"),
        Column::int("team_id"),
        Column::text("name"),
        Column::int("score"),
        Column::timestamp(AuditFields::CREATED_AT),
        Column::timestamp(AuditFields::UPDATED_AT),
        Column::text(AuditFields::CREATED_BY),
        Column::text(AuditFields::UPDATED_BY),
        Column::timestamp(SoftDeleteFields::DELETED_AT),
        Column::text(SoftDeleteFields::DELETED_BY),
        Column::bool(SoftDeleteFields::IS_DELETED),
    ];

    fn to_values(&self) -> FieldMap {
        let mut values = field_map([
            ("id", RowValues::from(self.id)),
            ("team_id", self.team_id.into()),
            ("name", self.name.clone().into()),
            ("score", self.score.into()),
        ]);
        self.audit.write_values(&mut values);
        self.soft.write_values(&mut values);
        values
    }

    fn from_row(row: &CustomDbRow) -> Result<Self, CrudError> {
        Ok(Self {
            id: row.opt_int("id")?,
            team_id: row.opt_int("team_id")?,
            name: row.opt_text("name")?.unwrap_or_default(),
            score: row.opt_int("score")?.unwrap_or_default(),
            audit: AuditFields::from_row(row)?,
            soft: SoftDeleteFields::from_row(row)?,
        })
    }

    fn set_field(&mut self, column: &str, value: RowValues) -> Result<(), CrudError> {
        match column {
            "id" => self.id = value.as_int().copied(),
            "team_id" => self.team_id = value.as_int().copied(),
            "name" => self.name = value.as_text().unwrap_or_default().to_string(),
            "score" => self.score = value.as_int().copied().unwrap_or_default(),
            AuditFields::UPDATED_BY => self.audit.updated_by = value.as_text().map(str::to_string),
            SoftDeleteFields::IS_DELETED => {
                self.soft.is_deleted = value.as_bool().copied().unwrap_or(false);
            }
            SoftDeleteFields::DELETED_BY => self.soft.deleted_by = value.as_text().map(str::to_string),
            SoftDeleteFields::DELETED_AT => {
                self.soft.deleted_at = value.as_timestamp().map(|ts| ts.and_utc());
            }
            other => return Err(CrudError::validation(other, "column is not writable")),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.score < 0 {
            return Err(ValidationError::field("score", "must not be negative")
                .with_value(RowValues::Int(self.score)));
        }
        Ok(())
    }

    fn audit_fields_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }
}

impl Auditable for Player {
    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

impl SoftDeletable for Player {
    fn soft_delete_fields(&self) -> &SoftDeleteFields {
        &self.soft
    }

    fn soft_delete_fields_mut(&mut self) -> &mut SoftDeleteFields {
        &mut self.soft
    }
}
