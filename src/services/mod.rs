pub mod exam_api;
