pub mod error;

// data module
pub mod data {
    pub mod column;
    pub mod sample;
    pub mod labels;
}

// algorithm module
pub mod algorithm {
    pub mod predicate;
    pub mod selection;
    pub mod binning;
    pub mod weighting;
    pub mod scaler;
    pub mod images;
    pub mod composition;
}
