//! Typed records for the inverter's ASCII query responses.

use crate::prelude::*;
use serde::Serialize;

/// General status response (`QPIGS`). The payload is `(` followed by 21
/// whitespace-separated tokens. Unrecognized tokens are carried verbatim so
/// that persistence keeps the full reading.
///
/// ```text
/// (000.0  00.0    228.2   50.0     0346    0337   011    429   27.00  000     095   0038  01.3  248.1  00.00  ...  00336
///  AcInV  AcInHz  AcOutV  AcOutHz  LoadVA  LoadW  Load%  BusV  BatV   BatChA  Bat%  Temp  PvA   PvV               PvW
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QpigsRecord {
    pub raw: String,
    pub ac_in_v: f32,
    pub ac_in_hz: f32,
    pub ac_out_v: f32,
    pub ac_out_hz: f32,
    pub load_va: f32,
    pub load_w: f32,
    pub load_p: f32,
    pub bus_v: f32,
    pub bat_v: f32,
    pub bat_ch_a: f32,
    pub bat_p: f32,
    pub temp: f32,
    pub pv_a: f32,
    pub pv_v: f32,
    pub pv_w: f32,
    pub aux_1: f32,
    pub aux_2: String,
    pub aux_3: String,
    pub aux_4: String,
    pub aux_5: String,
    pub aux_6: String,
}

pub fn parse_qpigs(payload: &str) -> Result<QpigsRecord> {
    let body = payload
        .strip_prefix('(')
        .ok_or_else(|| anyhow!("QPIGS response does not start with '(': [{}]", payload))?;
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 21 {
        bail!("QPIGS response has {} tokens, expected 21", tokens.len());
    }

    let num = |i: usize| -> Result<f32> {
        tokens[i]
            .parse::<f32>()
            .map_err(|_| anyhow!("QPIGS token {} is not numeric: [{}]", i + 1, tokens[i]))
    };

    Ok(QpigsRecord {
        raw: payload.to_string(),
        ac_in_v: num(0)?,
        ac_in_hz: num(1)?,
        ac_out_v: num(2)?,
        ac_out_hz: num(3)?,
        load_va: num(4)?,
        load_w: num(5)?,
        load_p: num(6)?,
        bus_v: num(7)?,
        bat_v: num(8)?,
        bat_ch_a: num(9)?,
        bat_p: num(10)?,
        temp: num(11)?,
        pv_a: num(12)?,
        pv_v: num(13)?,
        aux_1: num(14)?,
        aux_2: tokens[15].to_string(),
        aux_3: tokens[16].to_string(),
        aux_4: tokens[17].to_string(),
        aux_5: tokens[18].to_string(),
        pv_w: num(19)?,
        aux_6: tokens[20].to_string(),
    })
}

/// Inverter model family, detected via `QMN`. The family decides how the
/// charger-priority command is encoded on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum InverterModel {
    #[default]
    Unknown,
    King6200,
    Mks2_5600,
}

impl InverterModel {
    pub fn describe(&self) -> &'static str {
        match self {
            InverterModel::Unknown => "Unknown",
            InverterModel::King6200 => "King-6200",
            InverterModel::Mks2_5600 => "MKS2-5600",
        }
    }
}

/// Parse a `QMN` response. Unrecognized model names map to `Unknown`,
/// which is not an error.
pub fn parse_qmn(payload: &str) -> Result<InverterModel> {
    let name = payload
        .strip_prefix('(')
        .ok_or_else(|| anyhow!("QMN response does not start with '(': [{}]", payload))?;
    Ok(match name.trim() {
        "King-6200" => InverterModel::King6200,
        "MKS2-5600" => InverterModel::Mks2_5600,
        _ => InverterModel::Unknown,
    })
}

/// Output source priority: which source feeds the inverter output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum PowerSource {
    #[default]
    Unknown,
    /// Utility, Solar, Battery
    Usb,
    /// Solar, Utility, Battery
    Sub,
    /// Solar, Battery, Utility
    Sbu,
}

impl PowerSource {
    pub fn command(&self) -> &'static str {
        match self {
            PowerSource::Unknown => "POP01", // unexpected code path
            PowerSource::Usb => "POP00",
            PowerSource::Sub => "POP01",
            PowerSource::Sbu => "POP02",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            PowerSource::Unknown => "Unknown",
            PowerSource::Usb => "USB",
            PowerSource::Sub => "SUB",
            PowerSource::Sbu => "SBU",
        }
    }
}

/// Charger priority: where battery charging current may come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ChargerPriority {
    #[default]
    Unknown,
    UtilitySolar,
    SolarOnly,
}

impl ChargerPriority {
    /// The wire encoding differs per model family; the two priorities we use
    /// are operationally equivalent across families.
    pub fn command(&self, model: InverterModel) -> &'static str {
        match model {
            InverterModel::King6200 => match self {
                ChargerPriority::Unknown | ChargerPriority::UtilitySolar => "PCP01",
                ChargerPriority::SolarOnly => "PCP02",
            },
            InverterModel::Mks2_5600 | InverterModel::Unknown => match self {
                ChargerPriority::Unknown | ChargerPriority::UtilitySolar => "PCP02",
                ChargerPriority::SolarOnly => "PCP03",
            },
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ChargerPriority::Unknown => "Unknown",
            ChargerPriority::UtilitySolar => "UtilitySolar",
            ChargerPriority::SolarOnly => "SolarOnly",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "(235.1 50.1 229.7 50.0 0620 0574 011 381 50.90 032 082 0046 09.0 273.8 00.00 00000 00010010 00 00 02431 010";

    #[test]
    fn parses_qpigs_fields() {
        let r = parse_qpigs(SAMPLE).unwrap();
        assert_eq!(r.ac_in_v, 235.1);
        assert_eq!(r.ac_in_hz, 50.1);
        assert_eq!(r.ac_out_v, 229.7);
        assert_eq!(r.ac_out_hz, 50.0);
        assert_eq!(r.load_va, 620.0);
        assert_eq!(r.load_w, 574.0);
        assert_eq!(r.load_p, 11.0);
        assert_eq!(r.bus_v, 381.0);
        assert_eq!(r.bat_v, 50.90);
        assert_eq!(r.bat_ch_a, 32.0);
        assert_eq!(r.bat_p, 82.0);
        assert_eq!(r.temp, 46.0);
        assert_eq!(r.pv_a, 9.0);
        assert_eq!(r.pv_v, 273.8);
        assert_eq!(r.pv_w, 2431.0);
        assert_eq!(r.aux_2, "00000");
        assert_eq!(r.aux_3, "00010010");
        assert_eq!(r.aux_6, "010");
        assert_eq!(r.raw, SAMPLE);
    }

    #[test]
    fn rejects_short_qpigs() {
        assert!(parse_qpigs("(235.1 50.1 229.7").is_err());
        assert!(parse_qpigs("235.1 50.1").is_err());
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        let bad = SAMPLE.replace("0574", "xyz");
        assert!(parse_qpigs(&bad).is_err());
    }

    #[test]
    fn parses_qmn_models() {
        assert_eq!(parse_qmn("(King-6200").unwrap(), InverterModel::King6200);
        assert_eq!(parse_qmn("(MKS2-5600").unwrap(), InverterModel::Mks2_5600);
        assert_eq!(parse_qmn("(VM-1000").unwrap(), InverterModel::Unknown);
        assert!(parse_qmn("King-6200").is_err());
    }

    #[test]
    fn power_source_commands() {
        assert_eq!(PowerSource::Usb.command(), "POP00");
        assert_eq!(PowerSource::Sub.command(), "POP01");
        assert_eq!(PowerSource::Sbu.command(), "POP02");
    }

    #[test]
    fn charger_priority_commands_differ_per_family() {
        let king = InverterModel::King6200;
        let mks = InverterModel::Mks2_5600;
        assert_eq!(ChargerPriority::UtilitySolar.command(king), "PCP01");
        assert_eq!(ChargerPriority::SolarOnly.command(king), "PCP02");
        assert_eq!(ChargerPriority::UtilitySolar.command(mks), "PCP02");
        assert_eq!(ChargerPriority::SolarOnly.command(mks), "PCP03");
        // Unknown model falls back to the MKS encoding
        assert_eq!(
            ChargerPriority::SolarOnly.command(InverterModel::Unknown),
            "PCP03"
        );
    }
}
