use crate::model::ENTITY_UNKNOWN;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    Date,
    /// Integer id that must exist in the named table.
    Reference(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

/// A row elsewhere that keeps a record alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
    pub table: &'static str,
    pub column: &'static str,
    pub relation: &'static str,
}

const fn dep(table: &'static str, column: &'static str, relation: &'static str) -> Dependent {
    Dependent {
        table,
        column,
        relation,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    pub sortable: &'static [&'static str],
    pub searchable: &'static [&'static str],
    pub default_sort: &'static str,
    pub dependents: &'static [Dependent],
    pub timestamps: bool,
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_sortable(&self, column: &str) -> bool {
        column == "id" || self.sortable.contains(&column)
    }
}

use FieldKind::{Date, Integer, Real, Reference, Text};

pub static PEOPLE: EntitySchema = EntitySchema {
    name: "people",
    table: "people",
    fields: &[
        opt("first_name", Text),
        opt("middle_name", Text),
        opt("last_name", Text),
        opt("married_name", Text),
        opt("title", Text),
        opt("nick_name", Text),
        opt("birth_date", Date),
        opt("birth_location", Text),
        opt("death_date", Date),
        opt("death_location", Text),
        opt("father", Reference("people")),
        opt("mother", Reference("people")),
        opt("marriage_id", Reference("marriages")),
        opt("notes", Text),
    ],
    sortable: &["last_name", "first_name", "birth_date", "death_date"],
    searchable: &["first_name", "middle_name", "last_name", "married_name", "nick_name"],
    default_sort: "last_name",
    dependents: &[
        dep("census", "person_id", "residency"),
        dep("res_group_members", "person_id", "residency"),
        dep("marriages", "person1_id", "marriage"),
        dep("marriages", "person2_id", "marriage"),
        dep("people", "father", "parentage"),
        dep("people", "mother", "parentage"),
        dep("businesses", "owner_id", "business ownership"),
        dep("deeds", "grantor_id", "deed"),
        dep("deeds", "grantee_id", "deed"),
    ],
    timestamps: true,
};

pub static MARRIAGES: EntitySchema = EntitySchema {
    name: "marriages",
    table: "marriages",
    fields: &[
        req("person1_id", Reference("people")),
        req("person2_id", Reference("people")),
        opt("marriage_date", Date),
        opt("marriage_location", Text),
        opt("divorce_date", Date),
        opt("notes", Text),
    ],
    sortable: &["marriage_date", "person1_id", "person2_id"],
    searchable: &["marriage_location", "notes"],
    default_sort: "marriage_date",
    dependents: &[],
    timestamps: false,
};

pub static CENSUS: EntitySchema = EntitySchema {
    name: "census",
    table: "census",
    fields: &[
        req("person_id", Reference("people")),
        req("census_year", Integer),
        req("census_dwellnum", Text),
        opt("census_householdnum", Text),
        opt("census_page", Text),
        opt("census_line", Text),
        opt("person_age", Integer),
        opt("sex", Text),
        opt("race", Text),
        opt("marital_status", Text),
        opt("relation_to_head", Text),
        opt("occupation", Text),
        opt("birth_place", Text),
        opt("real_estate_value", Text),
        opt("estate_value", Text),
        opt("address_id", Reference("addresses")),
        opt("res_group_id", Reference("res_groups")),
    ],
    sortable: &["census_year", "census_dwellnum", "census_householdnum", "person_id"],
    searchable: &["occupation", "birth_place", "relation_to_head"],
    default_sort: "census_year",
    dependents: &[],
    timestamps: false,
};

pub static ADDRESSES: EntitySchema = EntitySchema {
    name: "addresses",
    table: "addresses",
    fields: &[
        opt("street", Text),
        opt("city", Text),
        opt("county", Text),
        opt("state", Text),
        opt("latitude", Real),
        opt("longitude", Real),
        opt("notes", Text),
    ],
    sortable: &["street", "city", "county"],
    searchable: &["street", "city", "county"],
    default_sort: "street",
    dependents: &[],
    timestamps: false,
};

pub static CHURCHES: EntitySchema = EntitySchema {
    name: "churches",
    table: "churches",
    fields: &[
        req("name", Text),
        opt("denomination", Text),
        opt("founded", Date),
        opt("address_id", Reference("addresses")),
        opt("notes", Text),
    ],
    sortable: &["name", "denomination", "founded"],
    searchable: &["name", "denomination"],
    default_sort: "name",
    dependents: &[],
    timestamps: false,
};

pub static BUSINESSES: EntitySchema = EntitySchema {
    name: "businesses",
    table: "businesses",
    fields: &[
        req("name", Text),
        opt("business_type", Text),
        opt("opened", Date),
        opt("closed", Date),
        opt("address_id", Reference("addresses")),
        opt("owner_id", Reference("people")),
        opt("notes", Text),
    ],
    sortable: &["name", "business_type", "opened"],
    searchable: &["name", "business_type"],
    default_sort: "name",
    dependents: &[],
    timestamps: false,
};

pub static ORGANIZATIONS: EntitySchema = EntitySchema {
    name: "organizations",
    table: "organizations",
    fields: &[
        req("name", Text),
        opt("org_type", Text),
        opt("founded", Date),
        opt("notes", Text),
    ],
    sortable: &["name", "org_type"],
    searchable: &["name", "org_type"],
    default_sort: "name",
    dependents: &[],
    timestamps: false,
};

pub static SOURCES: EntitySchema = EntitySchema {
    name: "sources",
    table: "sources",
    fields: &[
        req("title", Text),
        opt("author", Text),
        opt("source_type", Text),
        opt("published", Date),
        opt("location", Text),
        opt("notes", Text),
    ],
    sortable: &["title", "author", "published"],
    searchable: &["title", "author"],
    default_sort: "title",
    dependents: &[],
    timestamps: false,
};

pub static LEGAL_DESCRIPTIONS: EntitySchema = EntitySchema {
    name: "legal_descriptions",
    table: "legal_descriptions",
    fields: &[
        req("description", Text),
        opt("section", Integer),
        opt("township", Text),
        opt("range_code", Text),
        opt("county", Text),
        opt("notes", Text),
    ],
    sortable: &["section", "township", "range_code"],
    searchable: &["description", "county"],
    default_sort: "section",
    dependents: &[dep("deeds", "legal_description_id", "deed")],
    timestamps: false,
};

pub static DEEDS: EntitySchema = EntitySchema {
    name: "deeds",
    table: "deeds",
    fields: &[
        opt("deed_number", Text),
        opt("book", Text),
        opt("page", Text),
        opt("deed_date", Date),
        opt("grantor_id", Reference("people")),
        opt("grantee_id", Reference("people")),
        opt("legal_description_id", Reference("legal_descriptions")),
        opt("notes", Text),
    ],
    sortable: &["deed_date", "deed_number", "book"],
    searchable: &["deed_number", "book", "notes"],
    default_sort: "deed_date",
    dependents: &[],
    timestamps: false,
};

pub static MAP_ASSETS: EntitySchema = EntitySchema {
    name: "map_assets",
    table: "map_assets",
    fields: &[
        req("name", Text),
        opt("asset_type", Text),
        opt("location", Text),
        opt("year", Integer),
        opt("notes", Text),
    ],
    sortable: &["name", "asset_type", "year"],
    searchable: &["name", "location"],
    default_sort: "name",
    dependents: &[],
    timestamps: false,
};

pub static ENTITIES: &[&EntitySchema] = &[
    &PEOPLE,
    &MARRIAGES,
    &CENSUS,
    &ADDRESSES,
    &CHURCHES,
    &BUSINESSES,
    &ORGANIZATIONS,
    &SOURCES,
    &LEGAL_DESCRIPTIONS,
    &DEEDS,
    &MAP_ASSETS,
];

pub fn schema(name: &str) -> AppResult<&'static EntitySchema> {
    ENTITIES
        .iter()
        .copied()
        .find(|s| s.name == name)
        .ok_or_else(|| {
            AppError::new(ENTITY_UNKNOWN, "Unknown record type.").with_context("entity", name)
        })
}

/// Tables an id may point at; used to vet `Reference` targets before interpolation.
pub fn is_reference_table(table: &str) -> bool {
    ENTITIES.iter().any(|s| s.table == table) || table == "res_groups"
}
