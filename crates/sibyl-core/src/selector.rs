use std::str::FromStr;

/// Row selector accepted by history commands: a single id, a comma list,
/// an inclusive range, or `all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    One(i64),
    Many(Vec<i64>),
    Range(i64, i64),
    All,
}

impl Selector {
    /// Expand to a concrete id list given the full set of existing ids.
    ///
    /// `Range` and `All` pick from `existing`; explicit ids are passed through
    /// even when absent (the store reports them as not found).
    pub fn resolve(&self, existing: &[i64]) -> Vec<i64> {
        match self {
            Selector::One(id) => vec![*id],
            Selector::Many(ids) => ids.clone(),
            Selector::Range(lo, hi) => existing
                .iter()
                .copied()
                .filter(|id| id >= lo && id <= hi)
                .collect(),
            Selector::All => existing.to_vec(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selector::All)
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty selector".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(Selector::All);
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lo: i64 = lo.trim().parse().map_err(|_| bad(s))?;
            let hi: i64 = hi.trim().parse().map_err(|_| bad(s))?;
            if lo > hi {
                return Err(format!("descending range: {s}"));
            }
            return Ok(Selector::Range(lo, hi));
        }
        if s.contains(',') {
            let ids = s
                .split(',')
                .map(|part| part.trim().parse::<i64>().map_err(|_| bad(s)))
                .collect::<Result<Vec<i64>, _>>()?;
            return Ok(Selector::Many(ids));
        }
        s.parse::<i64>().map(Selector::One).map_err(|_| bad(s))
    }
}

fn bad(s: &str) -> String {
    format!("invalid selector: {s}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_id() {
        assert_eq!("7".parse::<Selector>().unwrap(), Selector::One(7));
    }

    #[test]
    fn parses_comma_list() {
        assert_eq!(
            "1, 4,9".parse::<Selector>().unwrap(),
            Selector::Many(vec![1, 4, 9])
        );
    }

    #[test]
    fn parses_range() {
        assert_eq!("2-7".parse::<Selector>().unwrap(), Selector::Range(2, 7));
    }

    #[test]
    fn parses_all_case_insensitive() {
        assert_eq!("ALL".parse::<Selector>().unwrap(), Selector::All);
    }

    #[test]
    fn rejects_garbage_and_descending_range() {
        assert!("abc".parse::<Selector>().is_err());
        assert!("9-2".parse::<Selector>().is_err());
        assert!("".parse::<Selector>().is_err());
    }

    #[test]
    fn range_resolves_against_existing_ids() {
        let sel = Selector::Range(2, 7);
        assert_eq!(sel.resolve(&[1, 3, 5, 9]), vec![3, 5]);
    }

    #[test]
    fn all_resolves_to_everything() {
        assert_eq!(Selector::All.resolve(&[4, 8]), vec![4, 8]);
    }
}
