//! Statistical tests.

pub mod student_t_test;

pub use student_t_test::StudentTTest;
