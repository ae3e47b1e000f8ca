mod column_tests;
mod error_tests;
mod header_tests;
mod helpers;
mod table_tests;
