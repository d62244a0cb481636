pub mod dsv_file;
