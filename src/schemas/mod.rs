pub mod exam_upload;
