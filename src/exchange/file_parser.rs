// ==========================================
// 数据交换引擎 - 文件解析器实现
// ==========================================
// 支持: CSV / Excel (.xlsx) / JSON / XML(宿主委托) / 注册制自定义格式
// 约束: 解析失败整体失败，后续阶段永远拿不到部分结果
// ==========================================

use crate::domain::profile::{DialectOptions, ExchangeProfile};
use crate::domain::types::FileFormat;
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::traits::{FileParser, RawRecord, SpreadsheetReader, XmlRowReader};
use calamine::Reader;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

/// 表头缺失时合成的列名前缀: column_1..column_n
fn synthetic_header(index: usize) -> String {
    format!("column_{}", index + 1)
}

/// 行矩阵 → RawRecord 序列（表头处理 + 空行跳过的公共路径）
fn rows_to_records(
    rows: Vec<Vec<String>>,
    dialect: &DialectOptions,
) -> ExchangeResult<Vec<RawRecord>> {
    let mut iter = rows.into_iter().skip(dialect.skip_rows);

    let headers: Vec<String> = if dialect.has_header {
        match iter.next() {
            Some(header_row) => header_row.iter().map(|h| h.trim().to_string()).collect(),
            None => return Ok(Vec::new()),
        }
    } else {
        Vec::new()
    };

    let mut records = Vec::new();
    let mut row_number = 0usize;
    for row in iter {
        row_number += 1;
        let mut record = RawRecord::new(row_number);
        for (col_idx, value) in row.iter().enumerate() {
            let header = if dialect.has_header {
                match headers.get(col_idx) {
                    Some(h) if !h.is_empty() => h.clone(),
                    _ => continue,
                }
            } else {
                synthetic_header(col_idx)
            };
            record.fields.insert(header, value.trim().to_string());
        }

        // 跳过完全空白的行
        if record.is_blank() {
            row_number -= 1;
            continue;
        }
        record.row_number = row_number;
        records.push(record);
    }

    Ok(records)
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse(&self, bytes: &[u8], dialect: &DialectOptions) -> ExchangeResult<Vec<RawRecord>> {
        if !dialect.delimiter.is_ascii() || !dialect.quote.is_ascii() {
            return Err(ExchangeError::ProfileMisconfigured(
                "CSV 分隔符/引号必须是 ASCII 字符".to_string(),
            ));
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(dialect.delimiter as u8)
            .quote(dialect.quote as u8)
            .has_headers(false) // 表头与 skip_rows 在 rows_to_records 统一处理
            .flexible(true) // 允许行长度不一致
            .from_reader(Cursor::new(bytes));

        let mut rows: Vec<Vec<String>> = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|v| v.to_string()).collect());
        }

        rows_to_records(rows, dialect)
    }
}

// ==========================================
// 内置表格读取器（calamine）
// ==========================================
pub struct CalamineSpreadsheetReader;

impl SpreadsheetReader for CalamineSpreadsheetReader {
    fn read_rows(
        &self,
        bytes: &[u8],
        sheet_name: Option<&str>,
    ) -> ExchangeResult<Vec<Vec<String>>> {
        let mut workbook: calamine::Xlsx<_> = calamine::Xlsx::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| ExchangeError::ExcelParseError(e.to_string()))?;

        let sheet = match sheet_name {
            Some(name) => name.to_string(),
            None => {
                let names = workbook.sheet_names();
                if names.is_empty() {
                    return Err(ExchangeError::ExcelParseError(
                        "Excel 文件无工作表".to_string(),
                    ));
                }
                names[0].clone()
            }
        };

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| ExchangeError::ExcelParseError(e.to_string()))?;

        let rows = range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        Ok(rows)
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
// 表格二进制解析委托 SpreadsheetReader（内置 calamine，宿主可替换）
pub struct ExcelParser {
    reader: Arc<dyn SpreadsheetReader>,
}

impl ExcelParser {
    pub fn new(reader: Arc<dyn SpreadsheetReader>) -> Self {
        Self { reader }
    }
}

impl FileParser for ExcelParser {
    fn parse(&self, bytes: &[u8], dialect: &DialectOptions) -> ExchangeResult<Vec<RawRecord>> {
        let rows = self.reader.read_rows(bytes, dialect.sheet_name.as_deref())?;
        rows_to_records(rows, dialect)
    }
}

// ==========================================
// JSON Parser 实现
// ==========================================
// 接受: 顶层数组 / 对象的惯例键（data/items/records/rows）下的数组 /
//       json_root_path 指定路径下的数组 / 单对象视为一行
pub struct JsonParser;

/// 对象数组惯例键
const JSON_ARRAY_KEYS: [&str; 4] = ["data", "items", "records", "rows"];

impl JsonParser {
    /// 按点分路径取值（"result.rows" → value["result"]["rows"]）
    fn navigate<'a>(
        value: &'a serde_json::Value,
        path: &str,
    ) -> Option<&'a serde_json::Value> {
        let mut current = value;
        for seg in path.split('.').filter(|s| !s.is_empty()) {
            current = current.get(seg)?;
        }
        Some(current)
    }

    /// 标量 → 字符串（null → 空串，嵌套结构保留紧凑 JSON）
    fn scalar_to_string(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => other.to_string(),
        }
    }

    fn object_to_record(
        obj: &serde_json::Map<String, serde_json::Value>,
        row_number: usize,
    ) -> RawRecord {
        let mut record = RawRecord::new(row_number);
        for (k, v) in obj {
            record
                .fields
                .insert(k.clone(), Self::scalar_to_string(v));
        }
        record
    }
}

impl FileParser for JsonParser {
    fn parse(&self, bytes: &[u8], dialect: &DialectOptions) -> ExchangeResult<Vec<RawRecord>> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ExchangeError::JsonParseError(e.to_string()))?;

        // 定位行数组
        let rows: &serde_json::Value = if let Some(path) = dialect.json_root_path.as_deref() {
            Self::navigate(&value, path).ok_or_else(|| {
                ExchangeError::JsonParseError(format!("根路径不存在: {}", path))
            })?
        } else if value.is_array() {
            &value
        } else if let Some(obj) = value.as_object() {
            match JSON_ARRAY_KEYS
                .iter()
                .find_map(|k| obj.get(*k).filter(|v| v.is_array()))
            {
                Some(arr) => arr,
                // 单对象视为一行
                None => {
                    return Ok(vec![Self::object_to_record(obj, 1)]);
                }
            }
        } else {
            return Err(ExchangeError::JsonParseError(
                "顶层必须是数组或对象".to_string(),
            ));
        };

        let arr = rows.as_array().ok_or_else(|| {
            ExchangeError::JsonParseError("根路径下不是数组".to_string())
        })?;

        let mut records = Vec::with_capacity(arr.len());
        for (idx, item) in arr.iter().enumerate() {
            let obj = item.as_object().ok_or_else(|| {
                ExchangeError::JsonParseError(format!("第 {} 个元素不是对象", idx + 1))
            })?;
            let record = Self::object_to_record(obj, records.len() + 1);
            if record.is_blank() {
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

// ==========================================
// XML Parser 实现
// ==========================================
// XML 解析委托宿主 XmlRowReader（按 root/row 元素名配置）
pub struct XmlParser {
    reader: Arc<dyn XmlRowReader>,
}

impl XmlParser {
    pub fn new(reader: Arc<dyn XmlRowReader>) -> Self {
        Self { reader }
    }
}

impl FileParser for XmlParser {
    fn parse(&self, bytes: &[u8], dialect: &DialectOptions) -> ExchangeResult<Vec<RawRecord>> {
        let root = dialect.xml_root.as_deref().ok_or_else(|| {
            ExchangeError::ProfileMisconfigured("XML 格式需要配置 xml_root".to_string())
        })?;
        let row = dialect.xml_row.as_deref().ok_or_else(|| {
            ExchangeError::ProfileMisconfigured("XML 格式需要配置 xml_row".to_string())
        })?;

        let raw_rows = self
            .reader
            .read_rows(bytes, root, row)
            .map_err(|e| ExchangeError::XmlParseError(e.to_string()))?;

        let mut records = Vec::with_capacity(raw_rows.len());
        let mut row_number = 0usize;
        for fields in raw_rows {
            row_number += 1;
            let record = RawRecord { row_number, fields };
            if record.is_blank() {
                row_number -= 1;
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }
}

// ==========================================
// ParserRegistry - 解析器注册表
// ==========================================
// 按配置的 file_format 解析；CUSTOM 格式（银行对账单等）由宿主注册
pub struct ParserRegistry {
    spreadsheet_reader: Arc<dyn SpreadsheetReader>,
    xml_reader: Option<Arc<dyn XmlRowReader>>,
    custom: HashMap<String, Arc<dyn FileParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            spreadsheet_reader: Arc::new(CalamineSpreadsheetReader),
            xml_reader: None,
            custom: HashMap::new(),
        }
    }

    /// 替换表格读取器（宿主自定义实现）
    pub fn set_spreadsheet_reader(&mut self, reader: Arc<dyn SpreadsheetReader>) {
        self.spreadsheet_reader = reader;
    }

    pub fn set_xml_reader(&mut self, reader: Arc<dyn XmlRowReader>) {
        self.xml_reader = Some(reader);
    }

    /// 注册自定义格式解析器
    pub fn register_custom(&mut self, name: &str, parser: Arc<dyn FileParser>) {
        self.custom.insert(name.to_string(), parser);
    }

    /// 按配置解析文件字节
    pub fn parse(
        &self,
        profile: &ExchangeProfile,
        bytes: &[u8],
    ) -> ExchangeResult<Vec<RawRecord>> {
        match profile.file_format {
            FileFormat::Csv => CsvParser.parse(bytes, &profile.dialect),
            FileFormat::Excel => {
                ExcelParser::new(self.spreadsheet_reader.clone()).parse(bytes, &profile.dialect)
            }
            FileFormat::Json => JsonParser.parse(bytes, &profile.dialect),
            FileFormat::Xml => {
                let reader = self.xml_reader.clone().ok_or_else(|| {
                    ExchangeError::UnsupportedFormat(
                        "XML 解析需要宿主注册 XmlRowReader".to_string(),
                    )
                })?;
                XmlParser::new(reader).parse(bytes, &profile.dialect)
            }
            FileFormat::Custom => {
                let name = profile.custom_format.as_deref().ok_or_else(|| {
                    ExchangeError::ProfileMisconfigured(
                        "CUSTOM 格式需要配置 custom_format".to_string(),
                    )
                })?;
                let parser = self
                    .custom
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExchangeError::CustomParserNotFound(name.to_string()))?;
                parser.parse(bytes, &profile.dialect)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect() -> DialectOptions {
        DialectOptions::default()
    }

    #[test]
    fn test_csv_parser_basic() {
        let bytes = b"name,email\n\xe5\xbc\xa0\xe4\xb8\x89,zhang@example.com\nli,li@example.com\n";
        let records = CsvParser.parse(bytes, &dialect()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_number, 1);
        assert_eq!(records[0].get("name"), Some("张三"));
        assert_eq!(records[1].get("email"), Some("li@example.com"));
    }

    #[test]
    fn test_csv_parser_skip_blank_rows() {
        let bytes = b"name,email\na,a@x.com\n,\nb,b@x.com\n";
        let records = CsvParser.parse(bytes, &dialect()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].row_number, 2);
    }

    #[test]
    fn test_csv_parser_custom_delimiter() {
        let mut d = dialect();
        d.delimiter = ';';
        let bytes = b"a;b\n1;2\n";
        let records = CsvParser.parse(bytes, &d).unwrap();
        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[0].get("b"), Some("2"));
    }

    #[test]
    fn test_csv_parser_headerless_synthesizes_columns() {
        let mut d = dialect();
        d.has_header = false;
        let bytes = b"1,2\n3,4\n";
        let records = CsvParser.parse(bytes, &d).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("column_1"), Some("1"));
        assert_eq!(records[1].get("column_2"), Some("4"));
    }

    #[test]
    fn test_csv_parser_skip_rows() {
        let mut d = dialect();
        d.skip_rows = 2;
        let bytes = b"junk line\nanother\nname\nalice\n";
        let records = CsvParser.parse(bytes, &d).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some("alice"));
    }

    #[test]
    fn test_json_parser_top_level_array() {
        let bytes = br#"[{"name":"a","qty":3},{"name":"b","qty":null}]"#;
        let records = JsonParser.parse(bytes, &dialect()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("qty"), Some("3"));
        // null → 空值
        assert_eq!(records[1].get("qty"), None);
    }

    #[test]
    fn test_json_parser_conventional_key() {
        let bytes = br#"{"total":2,"data":[{"name":"a"},{"name":"b"}]}"#;
        let records = JsonParser.parse(bytes, &dialect()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_json_parser_single_object_as_row() {
        let bytes = br#"{"name":"solo","qty":1}"#;
        let records = JsonParser.parse(bytes, &dialect()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some("solo"));
    }

    #[test]
    fn test_json_parser_root_path() {
        let mut d = dialect();
        d.json_root_path = Some("result.rows".to_string());
        let bytes = br#"{"result":{"rows":[{"x":"1"}]}}"#;
        let records = JsonParser.parse(bytes, &d).unwrap();
        assert_eq!(records[0].get("x"), Some("1"));
    }

    #[test]
    fn test_json_parser_malformed_fails_whole() {
        let bytes = br#"{"data": [{"a": 1},"#;
        assert!(matches!(
            JsonParser.parse(bytes, &dialect()),
            Err(ExchangeError::JsonParseError(_))
        ));
    }

    #[test]
    fn test_registry_custom_parser_missing() {
        use crate::domain::types::ExchangeDirection;
        let registry = ParserRegistry::new();
        let mut profile =
            ExchangeProfile::new("t1", "bank_in", ExchangeDirection::Import, "bank_tx");
        profile.file_format = FileFormat::Custom;
        profile.custom_format = Some("mt940".to_string());

        assert!(matches!(
            registry.parse(&profile, b""),
            Err(ExchangeError::CustomParserNotFound(_))
        ));
    }

    #[test]
    fn test_registry_xml_requires_host_reader() {
        use crate::domain::types::ExchangeDirection;
        let registry = ParserRegistry::new();
        let mut profile =
            ExchangeProfile::new("t1", "xml_in", ExchangeDirection::Import, "orders");
        profile.file_format = FileFormat::Xml;
        profile.dialect.xml_root = Some("orders".to_string());
        profile.dialect.xml_row = Some("order".to_string());

        assert!(matches!(
            registry.parse(&profile, b"<orders/>"),
            Err(ExchangeError::UnsupportedFormat(_))
        ));
    }
}
