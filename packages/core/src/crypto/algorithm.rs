//! Идентификаторы алгоритмов и выбор общего алгоритма между устройствами.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::CoreError;

/// Закрытый набор асимметричных алгоритмов
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "RSA-OAEP-4096")]
    RsaOaep4096,
    #[serde(rename = "ML-KEM-512")]
    Kem512,
    #[serde(rename = "ML-KEM-768")]
    Kem768,
    #[serde(rename = "ML-KEM-1024")]
    Kem1024,
    #[serde(rename = "HYBRID-RSA4096-ML-KEM-768")]
    HybridRsaKem768,
}

/// Алгоритм, к которому откатываемся при пустом пересечении
pub const CLASSICAL_FALLBACK: Algorithm = Algorithm::RsaOaep4096;

/// Сильнейший квантовый алгоритм (цель `immediate` / `gradual` миграции)
pub const STRONGEST_QUANTUM: Algorithm = Algorithm::Kem1024;

/// Порядок предпочтения, от сильного к слабому
pub const PRIORITY: [Algorithm; 4] = [
    Algorithm::Kem1024,
    Algorithm::Kem768,
    Algorithm::HybridRsaKem768,
    Algorithm::Kem512,
];

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RsaOaep4096,
        Algorithm::Kem512,
        Algorithm::Kem768,
        Algorithm::Kem1024,
        Algorithm::HybridRsaKem768,
    ];

    /// Строковый идентификатор (тот же, что на проводе)
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RsaOaep4096 => "RSA-OAEP-4096",
            Algorithm::Kem512 => "ML-KEM-512",
            Algorithm::Kem768 => "ML-KEM-768",
            Algorithm::Kem1024 => "ML-KEM-1024",
            Algorithm::HybridRsaKem768 => "HYBRID-RSA4096-ML-KEM-768",
        }
    }

    /// Содержит ли алгоритм пост-квантовый компонент
    pub fn is_quantum(&self) -> bool {
        !matches!(self, Algorithm::RsaOaep4096)
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self, Algorithm::HybridRsaKem768)
    }

    /// KEM-часть алгоритма, которую выполняет удалённый сервис
    pub fn kem_component(&self) -> Option<Algorithm> {
        match self {
            Algorithm::RsaOaep4096 => None,
            Algorithm::HybridRsaKem768 => Some(Algorithm::Kem768),
            other => Some(*other),
        }
    }

    fn priority_rank(&self) -> Option<usize> {
        PRIORITY.iter().position(|a| a == self)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| CoreError::ValidationError(format!("Unknown algorithm: {}", s)))
    }
}

/// Выбрать сильнейший алгоритм, поддерживаемый всеми устройствами.
///
/// Пересечение всех наборов; если оно пусто (или в нём нет квантовых
/// алгоритмов) выбирается [`CLASSICAL_FALLBACK`]. Порядок входа не влияет на результат.
pub fn negotiate_algorithm(capability_sets: &[Vec<Algorithm>]) -> Algorithm {
    let mut sets = capability_sets.iter();

    let Some(first) = sets.next() else {
        return CLASSICAL_FALLBACK;
    };

    let common = sets.fold(
        first.iter().copied().collect::<BTreeSet<_>>(),
        |acc, set| {
            let set: BTreeSet<_> = set.iter().copied().collect();
            acc.intersection(&set).copied().collect()
        },
    );

    common
        .iter()
        .filter_map(|a| a.priority_rank().map(|rank| (rank, *a)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, a)| a)
        .unwrap_or(CLASSICAL_FALLBACK)
}

/// Разобрать набор возможностей устройства, пропуская неизвестные идентификаторы
pub fn parse_capabilities<S: AsRef<str>>(raw: &[S]) -> Vec<Algorithm> {
    raw.iter()
        .filter_map(|s| {
            let capability: &str = s.as_ref();
            match capability.parse::<Algorithm>() {
                Ok(a) => Some(a),
                Err(_) => {
                    tracing::debug!(
                        target: "crypto::algorithm",
                        capability = %capability,
                        "Ignoring unknown capability"
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use Algorithm::*;

    #[test]
    fn test_single_common_member_wins() {
        let sets = vec![vec![Kem512, Kem768], vec![Kem768, Kem1024], vec![Kem768]];
        assert_eq!(negotiate_algorithm(&sets), Kem768);
    }

    #[test]
    fn test_empty_intersection_falls_back() {
        let sets = vec![vec![Kem512], vec![Kem768]];
        assert_eq!(negotiate_algorithm(&sets), CLASSICAL_FALLBACK);
    }

    #[test]
    fn test_no_input_falls_back() {
        assert_eq!(negotiate_algorithm(&[]), CLASSICAL_FALLBACK);
    }

    #[test]
    fn test_priority_order() {
        let all = vec![Kem512, HybridRsaKem768, Kem768, Kem1024, RsaOaep4096];
        assert_eq!(negotiate_algorithm(&[all.clone(), all]), Kem1024);

        let sets = vec![vec![Kem512, HybridRsaKem768], vec![HybridRsaKem768, Kem512]];
        assert_eq!(negotiate_algorithm(&sets), HybridRsaKem768);
    }

    #[test]
    fn test_classical_only_intersection() {
        let sets = vec![vec![RsaOaep4096, Kem512], vec![RsaOaep4096]];
        assert_eq!(negotiate_algorithm(&sets), RsaOaep4096);
    }

    #[test]
    fn test_parse_roundtrip_and_unknown() {
        assert_eq!("ml-kem-768".parse::<Algorithm>().unwrap(), Kem768);
        assert!("DES".parse::<Algorithm>().is_err());

        let parsed = parse_capabilities(&["ML-KEM-1024", "bogus", "RSA-OAEP-4096"]);
        assert_eq!(parsed, vec![Kem1024, RsaOaep4096]);
    }

    #[test]
    fn test_quantum_flags() {
        assert!(!RsaOaep4096.is_quantum());
        assert!(HybridRsaKem768.is_quantum());
        assert_eq!(HybridRsaKem768.kem_component(), Some(Kem768));
        assert_eq!(RsaOaep4096.kem_component(), None);
    }
}
