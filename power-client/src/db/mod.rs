pub mod forecast_queries;
pub mod minute_reading_queries;
pub mod score_queries;
