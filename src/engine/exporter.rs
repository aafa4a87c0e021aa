// ==========================================
// 数据交换引擎 - 导出序列化器
// ==========================================
// 职责: 映射行 → 目标格式字节
// 支持: CSV / JSON（Excel/XML 导出未内置，走 UnsupportedFormat）
// ==========================================

use crate::domain::profile::{DialectOptions, ExchangeProfile};
use crate::domain::types::FileFormat;
use crate::domain::value::{FieldValue, MappedRecord};
use crate::exchange::error::{ExchangeError, ExchangeResult};

pub struct Exporter;

impl Exporter {
    /// 序列化映射行
    ///
    /// # 列序
    /// - 按 profile 映射的 sort_order（target_field 为输出列名）
    pub fn serialize(
        &self,
        profile: &ExchangeProfile,
        records: &[MappedRecord],
    ) -> ExchangeResult<Vec<u8>> {
        match profile.file_format {
            FileFormat::Csv => self.to_csv(profile, records),
            FileFormat::Json => self.to_json(records),
            other => Err(ExchangeError::UnsupportedFormat(format!(
                "{} 导出未内置（宿主可注册自定义写出）",
                other
            ))),
        }
    }

    fn to_csv(
        &self,
        profile: &ExchangeProfile,
        records: &[MappedRecord],
    ) -> ExchangeResult<Vec<u8>> {
        let dialect = &profile.dialect;
        if !dialect.delimiter.is_ascii() || !dialect.quote.is_ascii() {
            return Err(ExchangeError::ProfileMisconfigured(
                "CSV 分隔符/引号必须是 ASCII 字符".to_string(),
            ));
        }

        let headers: Vec<&str> = profile
            .mappings
            .iter()
            .map(|m| m.target_field.as_str())
            .collect();

        let mut writer = csv::WriterBuilder::new()
            .delimiter(dialect.delimiter as u8)
            .quote(dialect.quote as u8)
            .from_writer(Vec::new());

        if dialect.has_header {
            writer.write_record(&headers)?;
        }

        for record in records {
            let row: Vec<String> = headers
                .iter()
                .map(|field| {
                    record
                        .get(field)
                        .map(|v| format_value(v, dialect))
                        .unwrap_or_default()
                })
                .collect();
            writer.write_record(&row)?;
        }

        writer
            .into_inner()
            .map_err(|e| ExchangeError::FileWriteError(e.to_string()))
    }

    fn to_json(&self, records: &[MappedRecord]) -> ExchangeResult<Vec<u8>> {
        let rows: Vec<serde_json::Value> = records.iter().map(|r| r.to_json()).collect();
        serde_json::to_vec_pretty(&rows)
            .map_err(|e| ExchangeError::FileWriteError(e.to_string()))
    }
}

/// 字段值 → 输出文本（日期按方言格式排版，保证可按同配置回读）
fn format_value(value: &FieldValue, dialect: &DialectOptions) -> String {
    match value {
        FieldValue::Date(d) => d.format(&dialect.date_format).to_string(),
        FieldValue::DateTime(dt) => dt
            .naive_utc()
            .format(&dialect.datetime_format)
            .to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::FieldMapping;
    use crate::domain::types::ExchangeDirection;

    fn export_profile() -> ExchangeProfile {
        let mut profile =
            ExchangeProfile::new("t1", "contacts_out", ExchangeDirection::Export, "contacts");
        let mut m1 = FieldMapping::new(&profile.profile_id, "name", "name");
        m1.sort_order = 1;
        let mut m2 = FieldMapping::new(&profile.profile_id, "joined", "joined");
        m2.sort_order = 2;
        profile.mappings = vec![m1, m2];
        profile
    }

    #[test]
    fn test_csv_export_with_header_and_date_format() {
        let mut profile = export_profile();
        profile.dialect.date_format = "%d.%m.%Y".to_string();

        let mut record = MappedRecord::new(1);
        record.set("name", FieldValue::Text("张三".to_string()));
        record.set(
            "joined",
            FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()),
        );

        let bytes = Exporter.serialize(&profile, &[record]).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("name,joined"));
        assert!(text.contains("张三,07.03.2025"));
    }

    #[test]
    fn test_json_export() {
        let profile = {
            let mut p = export_profile();
            p.file_format = FileFormat::Json;
            p
        };

        let mut record = MappedRecord::new(1);
        record.set("name", FieldValue::Text("a".to_string()));
        record.set("joined", FieldValue::Null);

        let bytes = Exporter.serialize(&profile, &[record]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[0]["name"], "a");
        assert!(value[0]["joined"].is_null());
    }

    #[test]
    fn test_excel_export_unsupported() {
        let mut profile = export_profile();
        profile.file_format = FileFormat::Excel;

        assert!(matches!(
            Exporter.serialize(&profile, &[]),
            Err(ExchangeError::UnsupportedFormat(_))
        ));
    }
}
