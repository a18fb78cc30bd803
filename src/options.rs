use crate::clause_database::CleaningType;

#[derive(Debug, Clone)]
pub struct Options {
    // Clause activity:
    pub cla_decay: f64,
    pub cla_inc: f64,
    // ReduceDB:
    pub clean_type: CleaningType,
    /// Fraction of the ranked learnt population evicted per cleaning pass.
    pub remove_ratio: f64,
}

pub const DEFAULT_OPTIONS: Options = Options {
    // Clause activity:
    cla_decay: 0.999,
    cla_inc: 1.0,
    // ReduceDB:
    clean_type: CleaningType::Glue,
    remove_ratio: 0.5,
};

impl Default for Options {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}
