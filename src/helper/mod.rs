pub mod article_helpers;
pub mod audience_matcher;
pub mod auth_helpers;
pub mod authz;
pub mod feed_helpers;
pub mod reference_helpers;
pub mod sanitization_helpers;
