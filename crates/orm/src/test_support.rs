//! Small catalog schema shared by unit tests

use once_cell::sync::Lazy;

use crate::model::{Model, Record};
use crate::query::{OrderDirection, Predicate};
use crate::schema::{Association, AttributeEnum, ColumnKind, EntitySchema, EnumDef, SchemaRegistry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visibility {
    Draft,
    Published,
}

impl AttributeEnum for Visibility {
    const COLUMN: &'static str = "visibility";

    fn variants() -> &'static [Self] {
        &[Visibility::Draft, Visibility::Published]
    }

    fn name(&self) -> &'static str {
        match self {
            Visibility::Draft => "draft",
            Visibility::Published => "published",
        }
    }

    fn value(&self) -> i64 {
        match self {
            Visibility::Draft => 0,
            Visibility::Published => 1,
        }
    }
}

fn recent_titles() -> Predicate {
    Predicate::gte("year", 1970)
}

pub static CATALOG: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::new()
        .register(
            EntitySchema::new("Writer", "writers")
                .column("name", ColumnKind::Text)
                .required(&["name"])
                .with_association(
                    Association::has_many("titles", "Title", "writer_id")
                        .ordered_by("year", OrderDirection::Desc),
                )
                .with_association(Association::has_many_through("notes", "Note", "titles", "notes")),
        )
        .register(
            EntitySchema::new("Title", "titles")
                .column("name", ColumnKind::Text)
                .column("year", ColumnKind::Integer)
                .column("price", ColumnKind::Float)
                .column("visibility", ColumnKind::Integer)
                .column("writer_id", ColumnKind::BigInt)
                .column("revision", ColumnKind::Integer)
                .enumeration(EnumDef::of::<Visibility>())
                .default_scope(recent_titles)
                .locking_column("revision")
                .with_association(Association::belongs_to("writer", "Writer", "writer_id"))
                .with_association(Association::has_many("notes", "Note", "title_id"))
                .with_association(Association::many_to_many(
                    "shelves",
                    "Shelf",
                    "shelves_titles",
                    "title_id",
                    "shelf_id",
                )),
        )
        .register(
            EntitySchema::new("Note", "notes")
                .column("body", ColumnKind::Text)
                .column("title_id", ColumnKind::BigInt)
                .with_association(Association::belongs_to("title", "Title", "title_id")),
        )
        .register(
            EntitySchema::new("Shelf", "shelves")
                .column("label", ColumnKind::Text)
                .with_association(Association::many_to_many(
                    "titles",
                    "Title",
                    "shelves_titles",
                    "shelf_id",
                    "title_id",
                )),
        )
});

macro_rules! catalog_model {
    ($name:ident, $entity:literal) => {
        #[derive(Debug, Clone)]
        pub struct $name(Record);

        impl Model for $name {
            const ENTITY: &'static str = $entity;

            fn registry() -> &'static SchemaRegistry {
                &CATALOG
            }

            fn from_record(record: Record) -> Self {
                Self(record)
            }

            fn as_record(&self) -> &Record {
                &self.0
            }

            fn as_record_mut(&mut self) -> &mut Record {
                &mut self.0
            }

            fn into_record(self) -> Record {
                self.0
            }
        }
    };
}

catalog_model!(Writer, "Writer");
catalog_model!(Title, "Title");
catalog_model!(Note, "Note");
catalog_model!(Shelf, "Shelf");
