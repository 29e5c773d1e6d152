//! Audience descriptors: the OR-of-AND targeting rules attached to every article.
//!
//! A descriptor is a list of [`Rule`]s. An article is visible to a student context
//! when at least one rule matches; a rule matches when every dimension it constrains
//! contains one of the context's values. A dimension a rule leaves out (or sends as an
//! empty list) is a wildcard. An empty rule list means "general": everyone matches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub const MAX_COURSE: i64 = 6;
pub const BASE_CLASSES: [i64; 2] = [9, 11];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AudienceError {
    #[error("{dimension} ids must be positive, got {value}")]
    NonPositiveId { dimension: &'static str, value: i64 },
    #[error("course must be between 1 and {max}, got {value}")]
    CourseOutOfRange { value: i64, max: i64 },
    #[error("base class must be 9 or 11, got {0}")]
    InvalidBaseClass(i64),
    #[error("unknown audience value '{0}'")]
    UnknownAudience(String),
}

/// A targeting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    InstitutionType,
    EducationForm,
    Speciality,
    City,
    AdmissionYear,
    Course,
    SchoolClass,
    BaseClass,
}

impl Dimension {
    /// Also the cartesian expansion order used by [`expand_for_creation`].
    pub const ALL: [Dimension; 8] = [
        Dimension::InstitutionType,
        Dimension::EducationForm,
        Dimension::Speciality,
        Dimension::City,
        Dimension::AdmissionYear,
        Dimension::Course,
        Dimension::SchoolClass,
        Dimension::BaseClass,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Dimension::InstitutionType => "institution_type",
            Dimension::EducationForm => "education_form",
            Dimension::Speciality => "speciality",
            Dimension::City => "city",
            Dimension::AdmissionYear => "admission_year",
            Dimension::Course => "course",
            Dimension::SchoolClass => "school_class",
            Dimension::BaseClass => "base_class",
        }
    }

    fn check_value(self, value: i64) -> Result<(), AudienceError> {
        match self {
            Dimension::Course if !(1..=MAX_COURSE).contains(&value) => {
                Err(AudienceError::CourseOutOfRange { value, max: MAX_COURSE })
            }
            Dimension::BaseClass if !BASE_CLASSES.contains(&value) => {
                Err(AudienceError::InvalidBaseClass(value))
            }
            _ if value <= 0 => Err(AudienceError::NonPositiveId { dimension: self.key(), value }),
            _ => Ok(()),
        }
    }
}

/// One AND-of-constraints unit. `None` means no constraint on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_type_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education_form_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speciality_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_year_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub courses: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_class_ids: Option<BTreeSet<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_classes: Option<BTreeSet<i64>>,
}

impl Rule {
    pub fn wildcard() -> Self {
        Rule::default()
    }

    fn slot(&self, dim: Dimension) -> &Option<BTreeSet<i64>> {
        match dim {
            Dimension::InstitutionType => &self.institution_type_ids,
            Dimension::EducationForm => &self.education_form_ids,
            Dimension::Speciality => &self.speciality_ids,
            Dimension::City => &self.city_ids,
            Dimension::AdmissionYear => &self.admission_year_ids,
            Dimension::Course => &self.courses,
            Dimension::SchoolClass => &self.school_class_ids,
            Dimension::BaseClass => &self.base_classes,
        }
    }

    fn slot_mut(&mut self, dim: Dimension) -> &mut Option<BTreeSet<i64>> {
        match dim {
            Dimension::InstitutionType => &mut self.institution_type_ids,
            Dimension::EducationForm => &mut self.education_form_ids,
            Dimension::Speciality => &mut self.speciality_ids,
            Dimension::City => &mut self.city_ids,
            Dimension::AdmissionYear => &mut self.admission_year_ids,
            Dimension::Course => &mut self.courses,
            Dimension::SchoolClass => &mut self.school_class_ids,
            Dimension::BaseClass => &mut self.base_classes,
        }
    }

    /// The accepted values for `dim`, or `None` when the dimension is a wildcard.
    /// An empty set is read as a wildcard too.
    pub fn constraint(&self, dim: Dimension) -> Option<&BTreeSet<i64>> {
        self.slot(dim).as_ref().filter(|set| !set.is_empty())
    }

    /// Adds values to the constraint on `dim`.
    pub fn with(mut self, dim: Dimension, values: impl IntoIterator<Item = i64>) -> Self {
        self.slot_mut(dim).get_or_insert_with(BTreeSet::new).extend(values);
        self
    }

    pub fn is_wildcard(&self) -> bool {
        Dimension::ALL.iter().all(|&dim| self.constraint(dim).is_none())
    }

    /// Drops empty sets so that stored rules only carry real constraints.
    pub fn canonical(mut self) -> Self {
        for dim in Dimension::ALL {
            let slot = self.slot_mut(dim);
            if slot.as_ref().map_or(false, |set| set.is_empty()) {
                *slot = None;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), AudienceError> {
        for dim in Dimension::ALL {
            if let Some(values) = self.constraint(dim) {
                for &value in values {
                    dim.check_value(value)?;
                }
            }
        }
        Ok(())
    }
}

/// The resolved dimension values of a requesting student. Empty set = unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentContext {
    pub institution_type_ids: BTreeSet<i64>,
    pub education_form_ids: BTreeSet<i64>,
    pub speciality_ids: BTreeSet<i64>,
    pub city_ids: BTreeSet<i64>,
    pub admission_year_ids: BTreeSet<i64>,
    pub courses: BTreeSet<i64>,
    pub school_class_ids: BTreeSet<i64>,
    pub base_classes: BTreeSet<i64>,
}

impl StudentContext {
    pub fn values(&self, dim: Dimension) -> &BTreeSet<i64> {
        match dim {
            Dimension::InstitutionType => &self.institution_type_ids,
            Dimension::EducationForm => &self.education_form_ids,
            Dimension::Speciality => &self.speciality_ids,
            Dimension::City => &self.city_ids,
            Dimension::AdmissionYear => &self.admission_year_ids,
            Dimension::Course => &self.courses,
            Dimension::SchoolClass => &self.school_class_ids,
            Dimension::BaseClass => &self.base_classes,
        }
    }

    pub fn values_mut(&mut self, dim: Dimension) -> &mut BTreeSet<i64> {
        match dim {
            Dimension::InstitutionType => &mut self.institution_type_ids,
            Dimension::EducationForm => &mut self.education_form_ids,
            Dimension::Speciality => &mut self.speciality_ids,
            Dimension::City => &mut self.city_ids,
            Dimension::AdmissionYear => &mut self.admission_year_ids,
            Dimension::Course => &mut self.courses,
            Dimension::SchoolClass => &mut self.school_class_ids,
            Dimension::BaseClass => &mut self.base_classes,
        }
    }

    pub fn with(mut self, dim: Dimension, values: impl IntoIterator<Item = i64>) -> Self {
        self.values_mut(dim).extend(values);
        self
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|&dim| self.values(dim).is_empty())
    }
}

/// Coarse audience kind of the single-field legacy encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceKind {
    All,
    City,
    Course,
}

impl AudienceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AudienceKind::All => "all",
            AudienceKind::City => "city",
            AudienceKind::Course => "course",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AudienceError> {
        match value.trim().to_lowercase().as_str() {
            "all" | "common" => Ok(AudienceKind::All),
            "city" => Ok(AudienceKind::City),
            "course" => Ok(AudienceKind::Course),
            other => Err(AudienceError::UnknownAudience(other.to_string())),
        }
    }
}

/// Raw `publish_scope` payload. Accepts the explicit `rules` list, the flat
/// multi-select lists (read as one implicit rule) and the old single keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishScope {
    #[serde(default)]
    pub publish_for_all: bool,
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
    #[serde(default)]
    pub institution_type_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub education_form_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub speciality_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub city_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub admission_year_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub courses: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub school_class_ids: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub base_classes: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub city_id: Option<i64>,
    #[serde(default)]
    pub course: Option<i64>,
    #[serde(default)]
    pub base_class: Option<i64>,
}

impl PublishScope {
    pub fn for_all() -> Self {
        PublishScope { publish_for_all: true, ..Default::default() }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        PublishScope { rules: Some(rules), ..Default::default() }
    }

    fn flat_rule(&self) -> Rule {
        let mut rule = Rule {
            institution_type_ids: self.institution_type_ids.clone(),
            education_form_ids: self.education_form_ids.clone(),
            speciality_ids: self.speciality_ids.clone(),
            city_ids: self.city_ids.clone(),
            admission_year_ids: self.admission_year_ids.clone(),
            courses: self.courses.clone(),
            school_class_ids: self.school_class_ids.clone(),
            base_classes: self.base_classes.clone(),
        };
        if let Some(city_id) = self.city_id {
            rule = rule.with(Dimension::City, [city_id]);
        }
        if let Some(course) = self.course {
            rule = rule.with(Dimension::Course, [course]);
        }
        if let Some(base_class) = self.base_class {
            rule = rule.with(Dimension::BaseClass, [base_class]);
        }
        rule.canonical()
    }
}

/// Turns a raw publish scope into the canonical rule list.
///
/// `publish_for_all` wins over everything else. A non-empty `rules` list wins over
/// the flat fields. With no constraint anywhere the result is the single wildcard rule.
pub fn normalize(scope: &PublishScope) -> Result<Vec<Rule>, AudienceError> {
    if scope.publish_for_all {
        return Ok(vec![Rule::wildcard()]);
    }

    if let Some(rules) = scope.rules.as_ref().filter(|rules| !rules.is_empty()) {
        let rules: Vec<Rule> = rules.iter().cloned().map(Rule::canonical).collect();
        for rule in &rules {
            rule.validate()?;
        }
        return Ok(rules);
    }

    let rule = scope.flat_rule();
    rule.validate()?;
    Ok(vec![rule])
}

/// Legacy `audience` value for a single rule: publish_for_all -> city -> course -> none.
pub fn derive_legacy_audience(rule: &Rule) -> Option<AudienceKind> {
    if rule.is_wildcard() {
        Some(AudienceKind::All)
    } else if rule.constraint(Dimension::City).is_some() {
        Some(AudienceKind::City)
    } else if rule.constraint(Dimension::Course).is_some() {
        Some(AudienceKind::Course)
    } else {
        None
    }
}

/// One fully-resolved (non-list) targeting tuple, as persisted by bulk creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConcreteArticleParams {
    pub institution_type_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub speciality_id: Option<i64>,
    pub city_id: Option<i64>,
    pub admission_year_id: Option<i64>,
    pub course: Option<i64>,
    pub school_class_id: Option<i64>,
    pub base_class: Option<i64>,
}

impl ConcreteArticleParams {
    pub fn get(&self, dim: Dimension) -> Option<i64> {
        match dim {
            Dimension::InstitutionType => self.institution_type_id,
            Dimension::EducationForm => self.education_form_id,
            Dimension::Speciality => self.speciality_id,
            Dimension::City => self.city_id,
            Dimension::AdmissionYear => self.admission_year_id,
            Dimension::Course => self.course,
            Dimension::SchoolClass => self.school_class_id,
            Dimension::BaseClass => self.base_class,
        }
    }

    pub fn set(&mut self, dim: Dimension, value: Option<i64>) {
        let slot = match dim {
            Dimension::InstitutionType => &mut self.institution_type_id,
            Dimension::EducationForm => &mut self.education_form_id,
            Dimension::Speciality => &mut self.speciality_id,
            Dimension::City => &mut self.city_id,
            Dimension::AdmissionYear => &mut self.admission_year_id,
            Dimension::Course => &mut self.course,
            Dimension::SchoolClass => &mut self.school_class_id,
            Dimension::BaseClass => &mut self.base_class,
        };
        *slot = value;
    }

    /// The singleton rule this tuple stands for.
    pub fn to_rule(&self) -> Rule {
        Dimension::ALL.iter().fold(Rule::wildcard(), |rule, &dim| match self.get(dim) {
            Some(value) => rule.with(dim, [value]),
            None => rule,
        })
    }
}

/// Cartesian-expands each rule's list-valued dimensions into one creation tuple
/// per combination. Wildcard dimensions stay `None`; duplicate tuples produced by
/// overlapping rules are emitted once, in first-seen order.
pub fn expand_for_creation(rules: &[Rule]) -> Vec<ConcreteArticleParams> {
    let mut expanded: Vec<ConcreteArticleParams> = Vec::new();

    for rule in rules {
        let mut combos = vec![ConcreteArticleParams::default()];
        for dim in Dimension::ALL {
            if let Some(values) = rule.constraint(dim) {
                combos = combos
                    .into_iter()
                    .flat_map(|combo| {
                        values.iter().map(move |&value| {
                            let mut next = combo.clone();
                            next.set(dim, Some(value));
                            next
                        })
                    })
                    .collect();
            }
        }

        for combo in combos {
            if !expanded.contains(&combo) {
                expanded.push(combo);
            }
        }
    }
    expanded
}

/// The single-field column tuple used before rule lists existed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyAudience {
    pub audience: Option<AudienceKind>,
    pub city_id: Option<i64>,
    pub course: Option<i64>,
    /// JSON `audience_courses` column: a course list OR'd together.
    pub courses: Option<Vec<i64>>,
    pub admission_year_id: Option<i64>,
    pub education_form_id: Option<i64>,
    pub speciality_id: Option<i64>,
    pub school_class_id: Option<i64>,
    pub institution_type_id: Option<i64>,
    pub base_class: Option<i64>,
}

impl LegacyAudience {
    fn has_any_value(&self) -> bool {
        self.audience.is_some()
            || self.city_id.is_some()
            || self.course.is_some()
            || self.courses.as_ref().map_or(false, |c| !c.is_empty())
            || self.admission_year_id.is_some()
            || self.education_form_id.is_some()
            || self.speciality_id.is_some()
            || self.school_class_id.is_some()
            || self.institution_type_id.is_some()
            || self.base_class.is_some()
    }

    /// Read adapter into the rule model. `audience = all` and the fully empty tuple
    /// are both general (no rules); otherwise every populated column is one constraint.
    pub fn to_rules(&self) -> Vec<Rule> {
        if self.audience == Some(AudienceKind::All) || !self.has_any_value() {
            return Vec::new();
        }

        let mut rule = Rule::wildcard();
        let singles = [
            (Dimension::InstitutionType, self.institution_type_id),
            (Dimension::EducationForm, self.education_form_id),
            (Dimension::Speciality, self.speciality_id),
            (Dimension::City, self.city_id),
            (Dimension::AdmissionYear, self.admission_year_id),
            (Dimension::Course, self.course),
            (Dimension::SchoolClass, self.school_class_id),
            (Dimension::BaseClass, self.base_class),
        ];
        for (dim, value) in singles {
            if let Some(value) = value {
                rule = rule.with(dim, [value]);
            }
        }
        if let Some(courses) = self.courses.as_ref().filter(|c| !c.is_empty()) {
            rule = rule.with(Dimension::Course, courses.iter().copied());
        }
        vec![rule]
    }
}

/// How an article's audience is stored: canonical rules, or the legacy tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum AudienceDescriptor {
    Rules(Vec<Rule>),
    Legacy(LegacyAudience),
}

impl AudienceDescriptor {
    pub fn general() -> Self {
        AudienceDescriptor::Rules(vec![Rule::wildcard()])
    }

    /// The rule list the matcher evaluates.
    pub fn effective_rules(&self) -> Vec<Rule> {
        match self {
            AudienceDescriptor::Rules(rules) => rules.clone(),
            AudienceDescriptor::Legacy(legacy) => legacy.to_rules(),
        }
    }

    pub fn is_general(&self) -> bool {
        let rules = self.effective_rules();
        rules.is_empty() || rules.iter().any(Rule::is_wildcard)
    }

    /// The indexed `audience` / `audience_city_id` / `audience_course` columns the
    /// coarse feed filter reads. A legacy tuple is its own coarse tuple. Canonical
    /// rules store the kind derived from a single rule, with the city or course
    /// filled only when that rule names exactly one; several values leave the
    /// column NULL, which the filter admits. Multi-rule descriptors that are not
    /// general carry no kind.
    pub fn coarse_columns(&self) -> LegacyAudience {
        let rules = match self {
            AudienceDescriptor::Legacy(legacy) => return legacy.clone(),
            AudienceDescriptor::Rules(rules) => rules,
        };
        if self.is_general() {
            return LegacyAudience { audience: Some(AudienceKind::All), ..Default::default() };
        }
        let single = match rules.as_slice() {
            [single] => single,
            _ => return LegacyAudience::default(),
        };
        let only = |dim: Dimension| match single.constraint(dim) {
            Some(values) if values.len() == 1 => values.iter().next().copied(),
            _ => None,
        };
        match derive_legacy_audience(single) {
            Some(AudienceKind::City) => LegacyAudience {
                audience: Some(AudienceKind::City),
                city_id: only(Dimension::City),
                ..Default::default()
            },
            Some(AudienceKind::Course) => LegacyAudience {
                audience: Some(AudienceKind::Course),
                course: only(Dimension::Course),
                ..Default::default()
            },
            _ => LegacyAudience::default(),
        }
    }

    /// Coarse kind used by the `view` listing filter. Multi-rule descriptors that
    /// are not general have no single kind.
    pub fn kind(&self) -> Option<AudienceKind> {
        if self.is_general() {
            return Some(AudienceKind::All);
        }
        match self {
            AudienceDescriptor::Legacy(legacy) if legacy.audience.is_some() => legacy.audience,
            _ => match self.effective_rules().as_slice() {
                [single] => derive_legacy_audience(single),
                _ => None,
            },
        }
    }
}
