//! InfluxDB line protocol 编码。
//!
//! ```text
//! measurement,tag1=v1,tag2=v2 field1=1.5,field2=3 1700000000000
//! ```
//!
//! tags/fields 来自 BTreeMap，按 key 排序输出；时间戳精度为毫秒。

use domain::MeasurementPoint;

/// 编码单个点；没有有限数值字段时返回 None（InfluxDB 要求至少一个字段）。
pub fn encode_point(point: &MeasurementPoint) -> Option<String> {
    let mut fields = point
        .fields
        .iter()
        .filter(|(_, value)| value.is_finite())
        .peekable();
    fields.peek()?;

    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    for (index, (key, value)) in fields.enumerate() {
        if index > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&value.to_string());
    }

    line.push(' ');
    line.push_str(&point.ts_ms.to_string());
    Some(line)
}

/// 编码一批点，每点一行。
pub fn encode_batch(points: &[MeasurementPoint]) -> String {
    points
        .iter()
        .filter_map(encode_point)
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

// tag key、tag value 与 field key 的转义规则相同
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_point() {
        let point = MeasurementPoint::new("environment", 1_000)
            .with_field("temperature", 26.5)
            .with_field("rpm", 1500.0);
        assert_eq!(
            encode_point(&point).as_deref(),
            Some("environment rpm=1500,temperature=26.5 1000")
        );
    }

    #[test]
    fn encode_sorts_tags() {
        let point = MeasurementPoint::new("environment", 5)
            .with_tag("site", "a")
            .with_tag("line", "2")
            .with_field("power", 1100.0);
        assert_eq!(
            encode_point(&point).as_deref(),
            Some("environment,line=2,site=a power=1100 5")
        );
    }

    #[test]
    fn encode_escapes_special_chars() {
        let point = MeasurementPoint::new("my measurement", 7)
            .with_tag("tag key", "a,b=c")
            .with_field("field key", 0.5);
        assert_eq!(
            encode_point(&point).as_deref(),
            Some("my\\ measurement,tag\\ key=a\\,b\\=c field\\ key=0.5 7")
        );
    }

    #[test]
    fn encode_skips_non_finite_fields() {
        let point = MeasurementPoint::new("environment", 9)
            .with_field("ok", 1.0)
            .with_field("bad", f64::NAN);
        assert_eq!(encode_point(&point).as_deref(), Some("environment ok=1 9"));

        let empty = MeasurementPoint::new("environment", 9).with_field("bad", f64::INFINITY);
        assert!(encode_point(&empty).is_none());
    }

    #[test]
    fn encode_batch_joins_lines() {
        let points = vec![
            MeasurementPoint::new("m", 1).with_field("v", 1.0),
            MeasurementPoint::new("m", 2).with_field("v", 2.0),
        ];
        assert_eq!(encode_batch(&points), "m v=1 1\nm v=2 2");
    }
}
