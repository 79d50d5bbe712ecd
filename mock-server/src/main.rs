use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("mock GLPI listening on {addr}");
    println!("App-Token: {}", mock_server::APP_TOKEN);
    println!("user_token: {}", mock_server::USER_TOKEN);
    mock_server::run(listener, mock_server::new_db()).await
}
