pub mod api_service;
pub mod cron_service;
pub mod errors;
pub mod graphql_schema;
pub mod graphql_service;
pub mod twilio_service;
