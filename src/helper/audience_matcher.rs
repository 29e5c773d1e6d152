//! Visibility decisions for a student context.
//!
//! [`matches`] is the authority. [`CoarsePredicate`] is a database-pushable
//! pre-filter over the indexed legacy columns (audience kind, city, course); it
//! must admit every row that `matches` would accept, and may admit more.

use rusqlite::types::Value;

use crate::models::audience::{AudienceDescriptor, AudienceKind, Dimension, Rule, StudentContext};

/// True when every constrained dimension of `rule` intersects the context's values.
/// Wildcard dimensions pass even when the context has no value for them.
pub fn rule_matches(context: &StudentContext, rule: &Rule) -> bool {
    Dimension::ALL.iter().all(|&dim| match rule.constraint(dim) {
        None => true,
        Some(accepted) => !accepted.is_disjoint(context.values(dim)),
    })
}

/// OR over rules. An empty rule list is general and matches everyone.
pub fn matches(context: &StudentContext, rules: &[Rule]) -> bool {
    rules.is_empty() || rules.iter().any(|rule| rule_matches(context, rule))
}

pub fn descriptor_matches(context: &StudentContext, descriptor: &AudienceDescriptor) -> bool {
    matches(context, &descriptor.effective_rules())
}

/// Coarse pre-filter built from the context's city and course values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoarsePredicate {
    city_ids: Vec<i64>,
    courses: Vec<i64>,
}

fn in_list(column: &str, count: usize) -> String {
    let placeholders = vec!["?"; count].join(", ");
    format!("{} IN ({})", column, placeholders)
}

impl CoarsePredicate {
    pub fn for_context(context: &StudentContext) -> Self {
        CoarsePredicate {
            city_ids: context.values(Dimension::City).iter().copied().collect(),
            courses: context.values(Dimension::Course).iter().copied().collect(),
        }
    }

    /// SQL over the `articles a` alias plus its positional parameters.
    ///
    /// Every row is narrowed by its coarse kind, city and course columns, which
    /// canonical rules fill from [`AudienceDescriptor::coarse_columns`]. Rows with
    /// no kind and unrecognized audience strings pass through so that the fine
    /// filter decides.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut values: Vec<Value> = Vec::new();

        let city_branch = if self.city_ids.is_empty() {
            "a.audience_city_id IS NULL".to_string()
        } else {
            values.extend(self.city_ids.iter().map(|&id| Value::Integer(id)));
            format!("(a.audience_city_id IS NULL OR {})", in_list("a.audience_city_id", self.city_ids.len()))
        };

        let course_branch = if self.courses.is_empty() {
            "(a.audience_course IS NULL OR a.audience_courses IS NOT NULL)".to_string()
        } else {
            values.extend(self.courses.iter().map(|&c| Value::Integer(c)));
            format!(
                "(a.audience_course IS NULL OR a.audience_courses IS NOT NULL OR {})",
                in_list("a.audience_course", self.courses.len())
            )
        };

        let sql = format!(
            "(a.audience IS NULL \
              OR a.audience NOT IN ('city', 'course') \
              OR (a.audience = 'city' AND {}) \
              OR (a.audience = 'course' AND {}))",
            city_branch, course_branch
        );
        (sql, values)
    }

    /// In-process mirror of [`CoarsePredicate::to_sql`].
    pub fn admits(&self, descriptor: &AudienceDescriptor) -> bool {
        let legacy = descriptor.coarse_columns();
        match legacy.audience {
            None | Some(AudienceKind::All) => true,
            Some(AudienceKind::City) => legacy.city_id.map_or(true, |id| self.city_ids.contains(&id)),
            Some(AudienceKind::Course) => {
                legacy.courses.is_some() || legacy.course.map_or(true, |c| self.courses.contains(&c))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool;
    use crate::models::audience::LegacyAudience;
    use crate::models::db_operations::articles_db_operations;
    use crate::models::NewArticle;
    use chrono::Utc;

    fn ctx_city_course(city: i64, course: i64) -> StudentContext {
        StudentContext::default()
            .with(Dimension::City, [city])
            .with(Dimension::Course, [course])
    }

    #[test]
    fn wildcard_and_empty_rules_match_everyone() {
        let contexts = [
            StudentContext::default(),
            ctx_city_course(1, 1),
            StudentContext::default().with(Dimension::Speciality, [7]).with(Dimension::AdmissionYear, [3, 4]),
        ];
        for ctx in &contexts {
            assert!(matches(ctx, &[]));
            assert!(matches(ctx, &[Rule::wildcard()]));
        }
    }

    #[test]
    fn constraints_within_a_rule_are_anded() {
        let rule = Rule::wildcard().with(Dimension::City, [1, 2]).with(Dimension::Course, [1]);
        assert!(!matches(&ctx_city_course(1, 2), &[rule.clone()]));
        assert!(matches(&ctx_city_course(1, 1), &[rule]));
    }

    #[test]
    fn rules_are_ored() {
        let rules = vec![
            Rule::wildcard().with(Dimension::City, [1]),
            Rule::wildcard().with(Dimension::Course, [2]),
        ];
        assert!(matches(&ctx_city_course(5, 2), &rules));
        assert!(!matches(&ctx_city_course(5, 5), &rules));
    }

    #[test]
    fn unconstrained_dimension_passes_missing_context_value() {
        let rule = Rule::wildcard().with(Dimension::Speciality, [7]);
        let ctx = StudentContext::default().with(Dimension::Speciality, [7]);
        assert!(matches(&ctx, &[rule.clone()]));
        assert!(!matches(&StudentContext::default().with(Dimension::Speciality, [8]), &[rule]));
    }

    #[test]
    fn constrained_dimension_fails_missing_context_value() {
        let rule = Rule::wildcard().with(Dimension::City, [1]);
        assert!(!matches(&StudentContext::default(), &[rule]));
    }

    #[test]
    fn multi_valued_context_matches_on_intersection() {
        let rule = Rule::wildcard().with(Dimension::AdmissionYear, [2022]);
        let ctx = StudentContext::default().with(Dimension::AdmissionYear, [2021, 2022]);
        assert!(matches(&ctx, &[rule]));
    }

    #[test]
    fn empty_constraint_set_is_a_wildcard() {
        let rule = Rule { city_ids: Some(Default::default()), ..Rule::wildcard() };
        assert!(matches(&StudentContext::default(), &[rule]));
    }

    fn legacy(audience: Option<AudienceKind>, city_id: Option<i64>, course: Option<i64>) -> AudienceDescriptor {
        AudienceDescriptor::Legacy(LegacyAudience { audience, city_id, course, ..Default::default() })
    }

    fn sample_descriptors() -> Vec<AudienceDescriptor> {
        vec![
            AudienceDescriptor::general(),
            AudienceDescriptor::Rules(vec![]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [1])]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [1, 2])]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::Course, [2])]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::Course, [1, 3])]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [2]).with(Dimension::Speciality, [7])]),
            AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::Speciality, [7])]),
            AudienceDescriptor::Rules(vec![
                Rule::wildcard().with(Dimension::City, [2]).with(Dimension::Course, [1]),
                Rule::wildcard().with(Dimension::Speciality, [7]),
            ]),
            legacy(Some(AudienceKind::All), None, None),
            legacy(None, None, None),
            legacy(Some(AudienceKind::City), Some(1), None),
            legacy(Some(AudienceKind::City), Some(2), None),
            legacy(Some(AudienceKind::City), None, None),
            legacy(Some(AudienceKind::Course), None, Some(1)),
            legacy(Some(AudienceKind::Course), None, Some(2)),
            legacy(Some(AudienceKind::Course), Some(1), Some(1)),
            AudienceDescriptor::Legacy(LegacyAudience {
                audience: Some(AudienceKind::Course),
                course: Some(2),
                courses: Some(vec![3, 4]),
                ..Default::default()
            }),
            AudienceDescriptor::Legacy(LegacyAudience {
                speciality_id: Some(7),
                education_form_id: Some(1),
                ..Default::default()
            }),
        ]
    }

    fn sample_contexts() -> Vec<StudentContext> {
        vec![
            StudentContext::default(),
            ctx_city_course(1, 1),
            ctx_city_course(2, 2),
            ctx_city_course(3, 3),
            StudentContext::default().with(Dimension::Course, [4]),
            StudentContext::default().with(Dimension::City, [1, 2]),
            StudentContext::default()
                .with(Dimension::Speciality, [7])
                .with(Dimension::EducationForm, [1])
                .with(Dimension::City, [2]),
        ]
    }

    #[test]
    fn coarse_predicate_never_rejects_a_match() {
        for ctx in sample_contexts() {
            let coarse = CoarsePredicate::for_context(&ctx);
            for descriptor in sample_descriptors() {
                if descriptor_matches(&ctx, &descriptor) {
                    assert!(coarse.admits(&descriptor), "{:?} rejected {:?}", ctx, descriptor);
                }
            }
        }
    }

    #[test]
    fn coarse_sql_agrees_with_in_process_mirror() {
        let pool = memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "INSERT INTO cities (id, name) VALUES (1, 'Москва'), (2, 'Казань'), (3, 'Томск');
             INSERT INTO education_forms (id, name) VALUES (1, 'Очная');
             INSERT INTO specialities (id, code, name) VALUES (7, '09.02.07', 'Информационные системы');",
        )
        .unwrap();
        let now = Utc::now();

        let mut stored = Vec::new();
        for (i, descriptor) in sample_descriptors().into_iter().enumerate() {
            let article = NewArticle {
                title: format!("Article {}", i),
                content: "<p>Body</p>".to_string(),
                is_published: true,
                is_for_staff: false,
                is_actual: true,
                tag: None,
                audience: descriptor,
            };
            let id = articles_db_operations::insert_article(&conn, &article, &now).unwrap();
            stored.push((id, article.audience));
        }

        for ctx in sample_contexts() {
            let coarse = CoarsePredicate::for_context(&ctx);
            let (clause, params) = coarse.to_sql();
            let mut from_sql: Vec<i64> = articles_db_operations::read_feed_candidates(&conn, &clause, &params)
                .unwrap()
                .into_iter()
                .map(|a| a.id)
                .collect();
            from_sql.sort_unstable();

            let mut mirrored: Vec<i64> = stored
                .iter()
                .filter(|(_, descriptor)| coarse.admits(descriptor))
                .map(|(id, _)| *id)
                .collect();
            mirrored.sort_unstable();

            assert_eq!(from_sql, mirrored, "disagreement for {:?}", ctx);
        }
    }

    #[test]
    fn coarse_predicate_narrows_single_rule_descriptors() {
        let coarse = CoarsePredicate::for_context(&ctx_city_course(3, 3));
        assert!(!coarse.admits(&AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [1])])));
        assert!(!coarse.admits(&AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::Course, [2])])));
        assert!(coarse.admits(&AudienceDescriptor::Rules(vec![Rule::wildcard().with(Dimension::City, [1, 2])])));
        assert!(coarse.admits(&AudienceDescriptor::Rules(vec![
            Rule::wildcard().with(Dimension::City, [1]),
            Rule::wildcard().with(Dimension::City, [2]),
        ])));
        assert!(coarse.admits(&AudienceDescriptor::general()));
    }

    #[test]
    fn coarse_predicate_narrows_legacy_city_rows() {
        let coarse = CoarsePredicate::for_context(&ctx_city_course(3, 3));
        assert!(!coarse.admits(&legacy(Some(AudienceKind::City), Some(1), None)));
        assert!(!coarse.admits(&legacy(Some(AudienceKind::Course), None, Some(1))));
        assert!(coarse.admits(&legacy(Some(AudienceKind::All), None, None)));
    }
}
