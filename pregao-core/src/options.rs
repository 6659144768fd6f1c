//! Registry of available ETLs, addressable by name.

use crate::b3::CotacaoB3Etl;
use crate::config::EtlConfig;
use crate::error::Result;
use crate::etl::Etl;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtlKind {
    /// Daily COTAHIST archives, fetched by date.
    CotacaoB3Diaria,
    /// Monthly COTAHIST archives, discovered on the listing page.
    CotacaoB3Mensal,
}

impl EtlKind {
    pub const ALL: [EtlKind; 2] = [EtlKind::CotacaoB3Diaria, EtlKind::CotacaoB3Mensal];

    pub fn as_str(&self) -> &'static str {
        match self {
            EtlKind::CotacaoB3Diaria => "cotacao_b3_diaria",
            EtlKind::CotacaoB3Mensal => "cotacao_b3_mensal",
        }
    }

    /// Build the concrete adapter.
    pub fn build(self, config: &EtlConfig) -> Result<CotacaoB3Etl> {
        match self {
            EtlKind::CotacaoB3Diaria => CotacaoB3Etl::daily(config),
            EtlKind::CotacaoB3Mensal => CotacaoB3Etl::monthly(config),
        }
    }

    pub fn build_boxed(self, config: &EtlConfig) -> Result<Box<dyn Etl>> {
        Ok(Box::new(self.build(config)?))
    }
}

impl fmt::Display for EtlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EtlKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EtlKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = EtlKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown ETL '{s}'. Valid: {}", valid.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::Stage;

    #[test]
    fn names_round_trip() {
        for kind in EtlKind::ALL {
            assert_eq!(kind.as_str().parse::<EtlKind>().unwrap(), kind);
        }
        assert!("cotacao_b3".parse::<EtlKind>().unwrap_err().contains("cotacao_b3_diaria"));
    }

    #[test]
    fn build_performs_no_io_beyond_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = EtlConfig {
            input_dir: dir.path().join("entrada"),
            output_dir: dir.path().join("saida"),
            ..EtlConfig::default()
        };
        for kind in EtlKind::ALL {
            let etl = kind.build_boxed(&config).unwrap();
            assert_eq!(etl.state().stage(), Stage::Unextracted);
            assert!(etl.retrieval_report().is_none());
        }
        assert!(config.input_dir.is_dir());
        assert!(config.output_dir.is_dir());
    }
}
