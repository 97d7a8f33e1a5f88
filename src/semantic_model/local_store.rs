use crate::semantic_model::{
    Aggregation, DimensionDefinition, DimensionJoin, FactSource, MetricDefinition, SemanticModel,
    SemanticModelStore, SemanticModelStoreError,
};
use async_trait::async_trait;

const STATION_TABLE: &str = "main_dim.dim_toll_station";

/// Built-in model of the toll-revenue warehouse.
#[derive(Clone)]
pub struct LocalSemanticModelStore {
    semantic_model: SemanticModel,
}

impl LocalSemanticModelStore {
    pub fn new() -> Self {
        let all_dimensions = strings(&[
            "city",
            "station_name",
            "highway_code",
            "vehicle_type_name",
            "payment_method_name",
        ]);

        let semantic_model = SemanticModel {
            name: "toll_transactions".to_string(),
            label: "收费交易".to_string(),
            description: "Toll transactions joined to the station dimension".to_string(),
            fact: FactSource {
                table: "main_dwd.dwd_toll_transaction".to_string(),
                date_column: "transaction_date".to_string(),
            },
            metrics: vec![
                MetricDefinition {
                    name: "revenue".to_string(),
                    label: "日收费收入".to_string(),
                    unit: "元".to_string(),
                    description: "Actual toll amount collected per day".to_string(),
                    aggregation: Aggregation::Sum,
                    source_column: "actual_amount".to_string(),
                    denominator_column: None,
                    allowed_dimensions: all_dimensions.clone(),
                    synonyms: strings(&["日收入", "收入", "收费收入", "daily revenue", "daily_revenue"]),
                },
                MetricDefinition {
                    name: "transactions".to_string(),
                    label: "日交易笔数".to_string(),
                    unit: "笔".to_string(),
                    description: "Number of toll transactions per day".to_string(),
                    aggregation: Aggregation::Count,
                    source_column: "transaction_id".to_string(),
                    denominator_column: None,
                    allowed_dimensions: all_dimensions,
                    synonyms: strings(&["交易笔数", "交易量", "daily_transactions", "transaction count"]),
                },
                MetricDefinition {
                    name: "avg_transaction_amount".to_string(),
                    label: "平均交易金额".to_string(),
                    unit: "元".to_string(),
                    description: "Average actual amount per transaction".to_string(),
                    aggregation: Aggregation::Avg,
                    source_column: "actual_amount".to_string(),
                    denominator_column: None,
                    allowed_dimensions: strings(&["city", "vehicle_type_name", "payment_method_name"]),
                    synonyms: strings(&["平均金额", "客单价", "average transaction amount"]),
                },
                MetricDefinition {
                    name: "discount_rate".to_string(),
                    label: "优惠率".to_string(),
                    unit: "ratio".to_string(),
                    description: "Discount amount over gross toll amount".to_string(),
                    aggregation: Aggregation::Ratio,
                    source_column: "discount_amount".to_string(),
                    denominator_column: Some("toll_amount".to_string()),
                    allowed_dimensions: strings(&["city", "station_name", "payment_method_name"]),
                    synonyms: strings(&["折扣率", "discount rate"]),
                },
            ],
            dimensions: vec![
                station_dimension(
                    "city",
                    "城市",
                    &["city"],
                    &["北京", "天津", "济南", "南京", "上海", "廊坊", "沧州", "德州", "泰安", "苏州"],
                ),
                station_dimension("station_name", "收费站", &["station"], &[]),
                station_dimension("highway_code", "高速公路", &["highway"], &[]),
                DimensionDefinition {
                    name: "vehicle_type_name".to_string(),
                    label: "车型".to_string(),
                    description: "Vehicle toll class".to_string(),
                    source_column: "vehicle_type_name".to_string(),
                    join: None,
                    synonyms: strings(&["vehicle type", "vehicle"]),
                    values: vec![],
                },
                DimensionDefinition {
                    name: "payment_method_name".to_string(),
                    label: "支付方式".to_string(),
                    description: "How the toll was paid".to_string(),
                    source_column: "payment_method_name".to_string(),
                    join: None,
                    synonyms: strings(&["payment method", "payment"]),
                    values: strings(&["ETC", "现金", "移动支付", "银行卡"]),
                },
            ],
        };

        LocalSemanticModelStore { semantic_model }
    }

    pub fn semantic_model(&self) -> SemanticModel {
        self.semantic_model.clone()
    }
}

impl Default for LocalSemanticModelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticModelStore for LocalSemanticModelStore {
    async fn load_semantic_model(&self) -> Result<SemanticModel, SemanticModelStoreError> {
        Ok(self.semantic_model())
    }
}

fn station_dimension(
    name: &str,
    label: &str,
    synonyms: &[&str],
    values: &[&str],
) -> DimensionDefinition {
    DimensionDefinition {
        name: name.to_string(),
        label: label.to_string(),
        description: format!("{} of the exit station", label),
        source_column: name.to_string(),
        join: Some(DimensionJoin {
            table: STATION_TABLE.to_string(),
            foreign_key: "station_id".to_string(),
            primary_key: "station_id".to_string(),
        }),
        synonyms: strings(synonyms),
        values: strings(values),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
