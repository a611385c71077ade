pub mod credential_format;
pub mod dcql_query;
pub mod error;
pub mod input_descriptor;
pub mod presentation_definition;
pub mod presentation_submission;
pub mod response;
pub mod sd_jwt;
pub mod util;
