use chrono::Utc;
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AppError;
use crate::helper::authz;
use crate::helper::sanitization_helpers::{sanitize_content, strip_all_html};
use crate::models::audience::{
    expand_for_creation, normalize, AudienceDescriptor, ConcreteArticleParams, Dimension,
    PublishScope, Rule,
};
use crate::models::db_operations::reference_db_operations::ReferenceTable;
use crate::models::db_operations::{articles_db_operations, reference_db_operations};
use crate::models::{Actor, Article, ArticleDetail, ArticleTag, Group, NewArticle};
use crate::DbPool;

pub const MIN_TITLE_CHARS: usize = 3;

/// Body of a create request.
#[derive(Debug, Default, Deserialize)]
pub struct ArticlePayload {
    pub title: String,
    pub content: String,
    pub is_published: Option<bool>,
    pub is_for_staff: Option<bool>,
    pub is_actual: Option<bool>,
    pub tag: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    pub publish_scope: Option<PublishScope>,
    /// Store one single-rule article per expanded combination instead of one article.
    #[serde(default)]
    pub split_by_combination: bool,
}

/// Partial update. Absent fields are left as they are.
#[derive(Debug, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_published: Option<bool>,
    pub is_for_staff: Option<bool>,
    pub is_actual: Option<bool>,
    pub tag: Option<String>,
    pub category_ids: Option<Vec<i64>>,
    pub publish_scope: Option<PublishScope>,
}

/// Direct cartesian creation across dimension lists and concrete groups.
#[derive(Debug, Default, Deserialize)]
pub struct BulkPayload {
    pub title: String,
    pub content: String,
    pub is_published: Option<bool>,
    pub is_for_staff: Option<bool>,
    pub is_actual: Option<bool>,
    pub tag: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub institution_type_ids: Vec<i64>,
    #[serde(default)]
    pub education_form_ids: Vec<i64>,
    #[serde(default)]
    pub speciality_ids: Vec<i64>,
    #[serde(default)]
    pub city_ids: Vec<i64>,
    #[serde(default)]
    pub admission_year_ids: Vec<i64>,
    #[serde(default)]
    pub courses: Vec<i64>,
    #[serde(default)]
    pub school_class_ids: Vec<i64>,
    #[serde(default)]
    pub base_classes: Vec<i64>,
    #[serde(default)]
    pub group_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreatedArticles {
    pub created: bool,
    pub article_ids: Vec<i64>,
    pub skipped_category_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpdatedArticle {
    pub article: Article,
    pub skipped_category_ids: Vec<i64>,
}

pub fn validate_title(raw: &str) -> Result<String, AppError> {
    let title = strip_all_html(raw).trim().to_string();
    if title.chars().count() < MIN_TITLE_CHARS {
        return Err(AppError::validation(format!(
            "Title must be at least {} characters long.",
            MIN_TITLE_CHARS
        )));
    }
    Ok(title)
}

pub fn validate_content(raw: &str) -> Result<String, AppError> {
    let content = sanitize_content(raw);
    if content.trim().is_empty() {
        return Err(AppError::validation("Content is required."));
    }
    Ok(content)
}

pub fn parse_tag(raw: Option<&str>) -> Result<Option<ArticleTag>, AppError> {
    match raw.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(None),
        Some(tag) => ArticleTag::parse(tag)
            .map(Some)
            .ok_or_else(|| AppError::validation(format!("Unknown tag '{}'.", tag))),
    }
}

fn log_skipped(article_ids: &[i64], skipped: &[i64]) {
    if !skipped.is_empty() {
        log::warn!("Skipped unknown category ids {:?} for articles {:?}", skipped, article_ids);
    }
}

/// Rule city ids land in the `audience_city_id` foreign key, so unknown ones are
/// rejected before anything is written.
fn ensure_known_cities<'a>(
    conn: &Connection,
    audiences: impl IntoIterator<Item = &'a AudienceDescriptor>,
) -> Result<(), AppError> {
    let mut checked = BTreeSet::new();
    for audience in audiences {
        for rule in audience.effective_rules() {
            for &city_id in rule.constraint(Dimension::City).into_iter().flatten() {
                if checked.insert(city_id)
                    && !reference_db_operations::reference_exists(conn, ReferenceTable::Cities, city_id)?
                {
                    return Err(AppError::validation(format!("Unknown city id {}.", city_id)));
                }
            }
        }
    }
    Ok(())
}

/// Inserts each article with its author and category links inside `tx`.
fn insert_all(
    tx: &Transaction,
    actor: &Actor,
    articles: &[NewArticle],
    category_ids: &[i64],
) -> Result<(Vec<i64>, Vec<i64>), AppError> {
    ensure_known_cities(tx, articles.iter().map(|article| &article.audience))?;
    let (found, skipped) = articles_db_operations::partition_category_ids(tx, category_ids)?;
    let now = Utc::now();
    let mut ids = Vec::with_capacity(articles.len());
    for article in articles {
        let id = articles_db_operations::insert_article(tx, article, &now)?;
        articles_db_operations::add_author(tx, id, actor.user_id)?;
        articles_db_operations::replace_categories(tx, id, &found)?;
        ids.push(id);
    }
    Ok((ids, skipped))
}

fn single_rule_descriptor(params: &ConcreteArticleParams) -> AudienceDescriptor {
    AudienceDescriptor::Rules(vec![params.to_rule().canonical()])
}

/// Creates one article carrying the normalized rule list, or one single-rule
/// article per expanded combination when `split_by_combination` is set.
/// All rows commit together.
pub fn create_articles(pool: &DbPool, actor: &Actor, payload: ArticlePayload) -> Result<CreatedArticles, AppError> {
    authz::can_create_article(actor).into_result()?;

    let title = validate_title(&payload.title)?;
    let content = validate_content(&payload.content)?;
    let tag = parse_tag(payload.tag.as_deref())?;
    let rules = normalize(&payload.publish_scope.unwrap_or_default())?;

    let descriptors: Vec<AudienceDescriptor> = if payload.split_by_combination {
        expand_for_creation(&rules).iter().map(single_rule_descriptor).collect()
    } else {
        vec![AudienceDescriptor::Rules(rules)]
    };

    let articles: Vec<NewArticle> = descriptors
        .into_iter()
        .map(|audience| NewArticle {
            title: title.clone(),
            content: content.clone(),
            is_published: payload.is_published.unwrap_or(false),
            is_for_staff: payload.is_for_staff.unwrap_or(false),
            is_actual: payload.is_actual.unwrap_or(true),
            tag,
            audience,
        })
        .collect();

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let (article_ids, skipped) = insert_all(&tx, actor, &articles, &payload.category_ids)?;
    tx.commit()?;

    log::info!("User {} created articles {:?}", actor.user_id, article_ids);
    log_skipped(&article_ids, &skipped);
    Ok(CreatedArticles { created: true, article_ids, skipped_category_ids: skipped })
}

fn group_params(group: &Group) -> ConcreteArticleParams {
    ConcreteArticleParams {
        institution_type_id: Some(group.institution_type_id),
        education_form_id: group.education_form_id,
        speciality_id: group.speciality_id,
        city_id: group.city_id,
        admission_year_id: group.admission_year_id,
        school_class_id: group.school_class_id,
        ..Default::default()
    }
}

/// The creation tuples for a bulk request: the cartesian product of the lists
/// (skipped when only groups are given) followed by one tuple per group, each
/// crossed with `courses` when present. Duplicates are dropped.
pub fn bulk_combinations(payload: &BulkPayload, groups: &[Group]) -> Result<Vec<ConcreteArticleParams>, AppError> {
    let lists = [
        (Dimension::InstitutionType, &payload.institution_type_ids),
        (Dimension::EducationForm, &payload.education_form_ids),
        (Dimension::Speciality, &payload.speciality_ids),
        (Dimension::City, &payload.city_ids),
        (Dimension::AdmissionYear, &payload.admission_year_ids),
        (Dimension::Course, &payload.courses),
        (Dimension::SchoolClass, &payload.school_class_ids),
        (Dimension::BaseClass, &payload.base_classes),
    ];
    let rule = lists
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .fold(Rule::wildcard(), |rule, (dim, values)| rule.with(*dim, values.iter().copied()));
    rule.validate()?;

    let only_courses = Dimension::ALL
        .iter()
        .all(|&dim| dim == Dimension::Course || rule.constraint(dim).is_none());

    let mut combos = if groups.is_empty() || !only_courses {
        expand_for_creation(&[rule])
    } else {
        Vec::new()
    };

    let courses: Vec<Option<i64>> = if payload.courses.is_empty() {
        vec![None]
    } else {
        payload.courses.iter().copied().collect::<BTreeSet<_>>().into_iter().map(Some).collect()
    };
    for group in groups {
        for course in &courses {
            let mut params = group_params(group);
            params.course = *course;
            if !combos.contains(&params) {
                combos.push(params);
            }
        }
    }
    Ok(combos)
}

/// All-or-nothing: any failure rolls back every generated article.
pub fn bulk_create(pool: &DbPool, actor: &Actor, payload: BulkPayload) -> Result<CreatedArticles, AppError> {
    authz::can_create_article(actor).into_result()?;

    let title = validate_title(&payload.title)?;
    let content = validate_content(&payload.content)?;
    let tag = parse_tag(payload.tag.as_deref())?;

    let mut conn = pool.get()?;
    let mut groups = Vec::with_capacity(payload.group_ids.len());
    for &group_id in &payload.group_ids {
        let group = reference_db_operations::read_group(&conn, group_id)?
            .ok_or_else(|| AppError::not_found(format!("Group {} not found.", group_id)))?;
        groups.push(group);
    }

    let articles: Vec<NewArticle> = bulk_combinations(&payload, &groups)?
        .iter()
        .map(|params| NewArticle {
            title: title.clone(),
            content: content.clone(),
            is_published: payload.is_published.unwrap_or(false),
            is_for_staff: payload.is_for_staff.unwrap_or(false),
            is_actual: payload.is_actual.unwrap_or(true),
            tag,
            audience: single_rule_descriptor(params),
        })
        .collect();

    let tx = conn.transaction()?;
    let (article_ids, skipped) = insert_all(&tx, actor, &articles, &payload.category_ids)?;
    tx.commit()?;

    log::info!("User {} bulk-created {} articles", actor.user_id, article_ids.len());
    log_skipped(&article_ids, &skipped);
    Ok(CreatedArticles { created: true, article_ids, skipped_category_ids: skipped })
}

pub fn update_article(pool: &DbPool, actor: &Actor, article_id: i64, update: ArticleUpdate) -> Result<UpdatedArticle, AppError> {
    let mut conn = pool.get()?;
    let mut article = articles_db_operations::read_article(&conn, article_id)?
        .ok_or_else(|| AppError::not_found("Article not found."))?;
    let author_ids = articles_db_operations::read_author_ids(&conn, article_id)?;
    authz::can_update_article(actor, &author_ids).into_result()?;

    if let Some(title) = &update.title {
        article.title = validate_title(title)?;
    }
    if let Some(content) = &update.content {
        article.content = validate_content(content)?;
    }
    if let Some(flag) = update.is_published {
        article.is_published = flag;
    }
    if let Some(flag) = update.is_for_staff {
        article.is_for_staff = flag;
    }
    if let Some(flag) = update.is_actual {
        article.is_actual = flag;
    }
    if update.tag.is_some() {
        article.tag = parse_tag(update.tag.as_deref())?;
    }
    if let Some(scope) = &update.publish_scope {
        article.audience = AudienceDescriptor::Rules(normalize(scope)?);
        ensure_known_cities(&conn, [&article.audience])?;
    }

    let tx = conn.transaction()?;
    let mut skipped = Vec::new();
    if let Some(category_ids) = &update.category_ids {
        let (found, unknown) = articles_db_operations::partition_category_ids(&tx, category_ids)?;
        articles_db_operations::replace_categories(&tx, article_id, &found)?;
        skipped = unknown;
    }
    articles_db_operations::update_article(&tx, &article, &Utc::now())?;
    let article = articles_db_operations::read_article(&tx, article_id)?
        .ok_or_else(|| AppError::not_found("Article not found."))?;
    tx.commit()?;

    log_skipped(&[article_id], &skipped);
    Ok(UpdatedArticle { article, skipped_category_ids: skipped })
}

pub fn set_publication(pool: &DbPool, actor: &Actor, article_id: i64, published: bool) -> Result<Article, AppError> {
    let conn = pool.get()?;
    if articles_db_operations::read_article(&conn, article_id)?.is_none() {
        return Err(AppError::not_found("Article not found."));
    }
    let author_ids = articles_db_operations::read_author_ids(&conn, article_id)?;
    authz::can_publish_article(actor, &author_ids).into_result()?;

    articles_db_operations::set_published(&conn, article_id, published, &Utc::now())?;
    articles_db_operations::read_article(&conn, article_id)?.ok_or_else(|| AppError::not_found("Article not found."))
}

pub fn delete_article(pool: &DbPool, actor: &Actor, article_id: i64) -> Result<(), AppError> {
    let conn = pool.get()?;
    if articles_db_operations::read_article(&conn, article_id)?.is_none() {
        return Err(AppError::not_found("Article not found."));
    }
    let author_ids = articles_db_operations::read_author_ids(&conn, article_id)?;
    authz::can_delete_article(actor, &author_ids).into_result()?;

    articles_db_operations::delete_article(&conn, article_id)?;
    log::info!("User {} deleted article {}", actor.user_id, article_id);
    Ok(())
}

/// Reads one article and counts the view. Drafts are hidden from non-staff.
pub fn read_article_detail(pool: &DbPool, viewer: Option<&Actor>, article_id: i64) -> Result<ArticleDetail, AppError> {
    let conn = pool.get()?;
    let mut article = articles_db_operations::read_article(&conn, article_id)?
        .ok_or_else(|| AppError::not_found("Article not found."))?;
    if !article.is_published && !authz::can_view_unpublished(viewer).is_allowed() {
        return Err(AppError::not_found("Article not found."));
    }

    article.views_count =
        articles_db_operations::record_view(&conn, article_id, viewer.map(|a| a.user_id), &Utc::now())?;
    let authors = articles_db_operations::read_authors(&conn, article_id)?;
    let category_ids = articles_db_operations::read_category_ids(&conn, article_id)?;
    let rules = article.audience.effective_rules();
    Ok(ArticleDetail { article, authors, category_ids, rules })
}
