use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::audience::AudienceDescriptor;

pub mod audience;
pub mod db_operations;

/// Timestamps are stored as fixed-width RFC 3339 text so text order is time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Reader,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            "editor" => Role::Editor,
            _ => Role::Reader,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Reader => "reader",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Editor)
    }
}

/// The authenticated caller, as supplied by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstitutionKind {
    School,
    College,
    University,
}

impl InstitutionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "school" => Some(InstitutionKind::School),
            "college" => Some(InstitutionKind::College),
            "university" => Some(InstitutionKind::University),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstitutionKind::School => "school",
            InstitutionKind::College => "college",
            InstitutionKind::University => "university",
        }
    }
}

/// A row of any lookup table, flattened to a common shape.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceEntity {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub institution_type_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub display_name: String,
    pub institution_type_id: i64,
    pub speciality_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub admission_year_id: Option<i64>,
    pub school_class_id: Option<i64>,
    pub city_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub display_name: String,
    pub institution_type_id: i64,
    pub speciality_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub admission_year_id: Option<i64>,
    pub school_class_id: Option<i64>,
    pub city_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupFilter {
    pub institution_type_id: Option<i64>,
    pub speciality_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub admission_year_id: Option<i64>,
    pub city_id: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleTag {
    Common,
    Important,
    Useful,
}

impl ArticleTag {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "common" => Some(ArticleTag::Common),
            "important" => Some(ArticleTag::Important),
            "useful" => Some(ArticleTag::Useful),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArticleTag::Common => "common",
            ArticleTag::Important => "important",
            ArticleTag::Useful => "useful",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub is_published: bool,
    pub is_for_staff: bool,
    pub is_actual: bool,
    pub tag: Option<ArticleTag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archive_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub views_count: i64,
    pub audience: AudienceDescriptor,
}

/// Everything needed to insert one article row.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub is_published: bool,
    pub is_for_staff: bool,
    pub is_actual: bool,
    pub tag: Option<ArticleTag>,
    pub audience: AudienceDescriptor,
}

#[derive(Debug, Serialize)]
pub struct AuthorSummary {
    pub id: i64,
    pub full_name: Option<String>,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ArticleDetail {
    #[serde(flatten)]
    pub article: Article,
    pub authors: Vec<AuthorSummary>,
    pub category_ids: Vec<i64>,
    pub rules: Vec<audience::Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSort {
    #[default]
    Newest,
    Oldest,
    Popular,
    Title,
}

impl ArticleSort {
    pub fn order_by(self) -> &'static str {
        match self {
            ArticleSort::Newest => "a.created_at DESC, a.id DESC",
            ArticleSort::Oldest => "a.created_at ASC, a.id ASC",
            ArticleSort::Popular => "a.views_count DESC, a.id DESC",
            ArticleSort::Title => "a.title COLLATE NOCASE ASC, a.id ASC",
        }
    }
}

/// Column-level filters for the article listing.
#[derive(Debug, Clone, Default)]
pub struct ArticleListFilter {
    pub is_published: Option<bool>,
    pub is_for_staff: Option<bool>,
    pub is_actual: Option<bool>,
    pub search: Option<String>,
    pub category_id: Option<i64>,
    /// Articles linked to any category owned by this student group.
    pub category_group_id: Option<i64>,
    pub sort: ArticleSort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32, total: u64) -> Self {
        let per_page_u64 = u64::from(per_page.max(1));
        let pages = (total + per_page_u64 - 1) / per_page_u64;
        Pagination {
            page,
            per_page,
            total,
            pages,
            has_next: u64::from(page) < pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub articles: Vec<T>,
    pub pagination: Pagination,
}

/// Accepts `1,2,3` or a single `1`; blank entries are ignored.
pub fn deserialize_id_list<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        Number(i64),
        String(String),
        Vec(Vec<i64>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::Number(n) => Ok(vec![n]),
        StringOrVec::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<i64>().map_err(serde::de::Error::custom))
            .collect(),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Query parameters from which a student context is resolved: an optional group
/// plus ad-hoc dimension values (singular or comma-separated lists).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextQuery {
    pub group_id: Option<i64>,
    pub institution_type_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub speciality_id: Option<i64>,
    pub city_id: Option<i64>,
    pub admission_year_id: Option<i64>,
    pub course: Option<i64>,
    pub school_class_id: Option<i64>,
    pub base_class: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub institution_type_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub education_form_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub speciality_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub city_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub admission_year_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub courses: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub school_class_ids: Vec<i64>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub base_classes: Vec<i64>,
}

impl ContextQuery {
    pub fn has_any_dimension(&self) -> bool {
        self.group_id.is_some() || !self.explicit_values().iter().all(|(_, v)| v.is_empty())
    }

    /// Explicit (non-group) values per dimension.
    pub fn explicit_values(&self) -> Vec<(audience::Dimension, Vec<i64>)> {
        use audience::Dimension;
        let merge = |single: Option<i64>, list: &Vec<i64>| -> Vec<i64> {
            single.into_iter().chain(list.iter().copied()).collect()
        };
        vec![
            (Dimension::InstitutionType, merge(self.institution_type_id, &self.institution_type_ids)),
            (Dimension::EducationForm, merge(self.education_form_id, &self.education_form_ids)),
            (Dimension::Speciality, merge(self.speciality_id, &self.speciality_ids)),
            (Dimension::City, merge(self.city_id, &self.city_ids)),
            (Dimension::AdmissionYear, merge(self.admission_year_id, &self.admission_year_ids)),
            (Dimension::Course, merge(self.course, &self.courses)),
            (Dimension::SchoolClass, merge(self.school_class_id, &self.school_class_ids)),
            (Dimension::BaseClass, merge(self.base_class, &self.base_classes)),
        ]
    }
}
