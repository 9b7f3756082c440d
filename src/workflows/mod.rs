pub mod weeding;
