pub mod transfers {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "transfers")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub transfer_id: String,
        pub created_time: i64,
        pub chain_a: String,
        pub action_a: String,
        /// Canonical amount as a decimal string; the full `u64` range does
        /// not fit a signed BIGINT.
        pub amount_a: String,
        pub tx_hash_a: String,
        pub chain_b: Option<String>,
        pub action_b: Option<String>,
        pub amount_b: Option<String>,
        pub tx_hash_b: Option<String>,
        pub is_matched: bool,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub recorded_at: DateTimeUtc,
        pub completed_at: Option<DateTimeUtc>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod chain_checkpoints {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "chain_checkpoints")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub chain: String,
        pub block_number: i64,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
